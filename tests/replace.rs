mod common;

use common::{FailingHost, RecordingProgress, canvas_with, layer_bytes, pattern};
use discolour::error::HostError;
use discolour::host::{LayerHost, PixelType};
use discolour::{CanvasState, Engine, FailurePolicy, StrategyKind, TransformError};

/// Three stacked layers: "Top", "Middle", "Bottom".
fn three_layers() -> CanvasState {
    let mut state = CanvasState::with_tile_size(12, 9, 4);
    for (i, name) in ["Top", "Middle", "Bottom"].into_iter().enumerate() {
        let mut data = pattern(12, 9, 4);
        data.iter_mut().for_each(|b| *b = b.wrapping_add(i as u8 * 40));
        state.push_raw_layer(name, PixelType::Rgba, 12, 9, &data).unwrap();
    }
    state
}

fn names(state: &CanvasState) -> Vec<String> {
    state.layers.iter().map(|l| l.name.clone()).collect()
}

#[test]
fn replace_keeps_name_position_and_shape() {
    for kind in StrategyKind::ALL {
        let mut state = three_layers();
        let middle = state.find_layer("Middle").unwrap();
        let before = state.layer_info(middle).unwrap();

        let report = Engine::new(kind, FailurePolicy::Rollback)
            .discolour(&mut state, middle, &mut RecordingProgress::default())
            .unwrap();

        assert_eq!(report.position, 1);
        assert_eq!(report.replaced, middle);
        assert_eq!(report.strategy, kind.name());
        assert_eq!(names(&state), ["Top", "Middle", "Bottom"]);
        assert_eq!(state.layer_position(report.layer).unwrap(), 1);

        let after = state.layer_info(report.layer).unwrap();
        assert_eq!(after.name, before.name);
        assert_eq!((after.width, after.height), (before.width, before.height));
        assert_eq!(after.pixel_type, before.pixel_type);
        assert!(matches!(state.layer_info(middle), Err(HostError::UnknownLayer(_))));
    }
}

#[test]
fn temporary_name_avoids_existing_layers() {
    let mut state = three_layers();
    let data = pattern(12, 9, 4);
    state.push_raw_layer("Middle temp", PixelType::Rgba, 12, 9, &data).unwrap();
    let middle = state.find_layer("Middle").unwrap();

    Engine::default()
        .discolour(&mut state, middle, &mut RecordingProgress::default())
        .unwrap();

    let mut all = names(&state);
    assert_eq!(all, ["Top", "Middle", "Bottom", "Middle temp"]);
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 4);
}

#[test]
fn replace_is_one_undo_step() {
    for kind in StrategyKind::ALL {
        let (mut state, id) = canvas_with(10, 6, PixelType::Rgb, 4);
        let original = layer_bytes(&state, "Background");
        let steps = state.history.undo_count();

        Engine::new(kind, FailurePolicy::Rollback)
            .discolour(&mut state, id, &mut RecordingProgress::default())
            .unwrap();
        let gray = layer_bytes(&state, "Background");
        assert_ne!(gray, original);
        assert_eq!(state.history.undo_count(), steps + 1, "{kind}");

        assert!(state.undo().is_some());
        assert_eq!(state.history.redo_count(), 1, "{kind}");
        assert_eq!(state.layers(), vec![id], "{kind}");
        assert_eq!(names(&state), ["Background"]);
        assert_eq!(layer_bytes(&state, "Background"), original, "{kind}");

        assert!(state.redo().is_some());
        assert_eq!(state.history.redo_count(), 0, "{kind}");
        assert_eq!(names(&state), ["Background"]);
        assert_eq!(layer_bytes(&state, "Background"), gray, "{kind}");
    }
}

#[test]
fn rollback_leaves_image_unchanged() {
    for kind in StrategyKind::ALL {
        let (state, id) = canvas_with(9, 9, PixelType::Rgb, 4);
        let original = layer_bytes(&state, "Background");
        // Region and bulk runs read once, up front.
        let allowed = match kind {
            StrategyKind::Direct | StrategyKind::TileNative => 5,
            StrategyKind::RegionBuffered | StrategyKind::BulkArray => 0,
        };
        let mut host = FailingHost::new(state, allowed);
        let mut progress = RecordingProgress::default();

        let err = Engine::new(kind, FailurePolicy::Rollback)
            .discolour(&mut host, id, &mut progress)
            .unwrap_err();

        assert!(matches!(err, TransformError::HostAccess(_)), "{kind}: {err:?}");
        assert_eq!(host.layers(), vec![id]);
        assert_eq!(names(&host.inner), ["Background"]);
        assert_eq!(layer_bytes(&host.inner, "Background"), original);
        assert_eq!(progress.ends, 1);
        assert_eq!(progress.messages.len(), 1);
        // The group was closed on the error path.
        assert_eq!(host.end_undo_group(), Err(HostError::UndoGroupUnbalanced));
    }
}

#[test]
fn keep_partial_swaps_in_the_partial_layer() {
    let (state, id) = canvas_with(9, 9, PixelType::Rgb, 4);
    let original = layer_bytes(&state, "Background");
    let mut host = FailingHost::new(state, 5);

    let err = Engine::new(StrategyKind::Direct, FailurePolicy::KeepPartial)
        .discolour(&mut host, id, &mut RecordingProgress::default())
        .unwrap_err();
    assert!(matches!(err, TransformError::HostAccess(_)));

    assert_eq!(names(&host.inner), ["Background"]);
    let layers = host.layers();
    assert_eq!(layers.len(), 1);
    assert_ne!(layers[0], id);
    let partial = layer_bytes(&host.inner, "Background");
    assert_ne!(partial, original);
    // Unwritten pixels stay cleared.
    assert!(partial[partial.len() - 3..].iter().all(|&b| b == 0));
}

#[test]
fn keep_partial_reports_the_transform_error_when_the_swap_fails() {
    let (state, id) = canvas_with(9, 9, PixelType::Rgb, 4);
    let mut host = FailingHost::new(state, 5);
    host.refuse_removal = true;

    let err = Engine::new(StrategyKind::Direct, FailurePolicy::KeepPartial)
        .discolour(&mut host, id, &mut RecordingProgress::default())
        .unwrap_err();

    // The read failure, not the refused removal.
    assert_eq!(err, TransformError::HostAccess(HostError::UnknownLayer(id)));
    assert_eq!(names(&host.inner), ["Background temp", "Background"]);
    assert_eq!(host.end_undo_group(), Err(HostError::UndoGroupUnbalanced));
}

#[test]
fn in_place_leaves_nothing_to_undo() {
    let (mut state, id) = canvas_with(8, 8, PixelType::Rgba, 4);
    let original = layer_bytes(&state, "Background");
    let steps = state.history.undo_count();

    Engine::default()
        .discolour_in_place(&mut state, id, &mut RecordingProgress::default())
        .unwrap();
    let gray = layer_bytes(&state, "Background");
    assert_ne!(gray, original);
    assert_eq!(state.layers(), vec![id]);
    assert_eq!(state.history.undo_count(), steps);

    state.undo();
    assert_eq!(layer_bytes(&state, "Background"), gray);
}

#[test]
fn split_channels_adds_named_layers() {
    let (mut state, id) = canvas_with(6, 5, PixelType::Rgba, 4);
    let src = layer_bytes(&state, "Background");
    let mut progress = RecordingProgress::default();

    let created = Engine::default().split_channels(&mut state, id, &mut progress).unwrap();

    assert_eq!(created.len(), 3);
    assert_eq!(
        names(&state),
        ["Background Blue", "Background Green", "Background Red", "Background"]
    );
    assert_eq!(layer_bytes(&state, "Background"), src);
    for (c, name) in ["Background Red", "Background Green", "Background Blue"].into_iter().enumerate() {
        let bytes = layer_bytes(&state, name);
        for (s, d) in src.chunks_exact(4).zip(bytes.chunks_exact(4)) {
            for k in 0..3 {
                assert_eq!(d[k], if k == c { s[k] } else { 0 });
            }
            assert_eq!(d[3], s[3]);
        }
    }
    assert_eq!(progress.ends, 1);

    state.undo();
    assert_eq!(names(&state), ["Background"]);
}

#[test]
fn split_rejects_gray_layers() {
    let (mut state, id) = canvas_with(3, 3, PixelType::GrayA, 2);
    let err = Engine::default()
        .split_channels(&mut state, id, &mut RecordingProgress::default())
        .unwrap_err();
    assert!(matches!(err, TransformError::PreconditionViolation(_)));
    assert_eq!(state.layers(), vec![id]);
}
