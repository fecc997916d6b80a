use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use discolour::cli::{self, CliArgs};
use discolour::io::load_image_sync;

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("discolour-cli-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_png(path: &Path, w: u32, h: u32) {
    let img = image::RgbImage::from_fn(w, h, |x, y| image::Rgb([(x * 30) as u8, (y * 40) as u8, 200]));
    img.save(path).unwrap();
}

fn write_gray_png(path: &Path, w: u32, h: u32) {
    let img = image::GrayImage::from_fn(w, h, |x, y| image::Luma([(x * 50 + y * 10) as u8]));
    img.save(path).unwrap();
}

fn run(args: &[&str], config: &Path) -> ExitCode {
    let mut argv = vec!["discolour"];
    argv.extend_from_slice(args);
    argv.extend_from_slice(&["--config", config.to_str().unwrap()]);
    cli::run(CliArgs::try_parse_from(argv).unwrap())
}

#[test]
fn discolour_command_writes_gray_png() {
    let dir = scratch("discolour");
    let input = dir.join("photo.png");
    let output = dir.join("gray.png");
    write_png(&input, 5, 4);

    let code = run(
        &["discolour", "-i", input.to_str().unwrap(), "-o", output.to_str().unwrap(), "--strategy", "bulk"],
        &dir.join("none.cfg"),
    );
    assert_eq!(code, ExitCode::SUCCESS);

    let gray = image::open(&output).unwrap().to_rgb8();
    assert_eq!(gray.dimensions(), (5, 4));
    assert!(gray.pixels().all(|p| p[0] == p[1] && p[1] == p[2]));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invert_command_processes_a_directory() {
    let dir = scratch("invert");
    let in_dir = dir.join("in");
    let out_dir = dir.join("out");
    std::fs::create_dir_all(&in_dir).unwrap();
    write_png(&in_dir.join("a.png"), 3, 3);
    write_png(&in_dir.join("b.png"), 2, 2);
    write_gray_png(&in_dir.join("scan.png"), 3, 3);
    std::fs::write(in_dir.join("notes.txt"), "skip me").unwrap();

    let code = run(
        &["invert", "--input-dir", in_dir.to_str().unwrap(), "--output-dir", out_dir.to_str().unwrap()],
        &dir.join("none.cfg"),
    );
    assert_eq!(code, ExitCode::SUCCESS);

    let inverted = image::open(out_dir.join("a.png")).unwrap().to_rgb8();
    assert_eq!(inverted.get_pixel(1, 2).0, [255 - 30, 255 - 80, 55]);
    assert!(out_dir.join("b.png").exists());
    assert!(!out_dir.join("notes.txt").exists());

    let scan = image::open(out_dir.join("scan.png")).unwrap();
    assert!(matches!(scan, image::DynamicImage::ImageLuma8(_)));
    assert_eq!(scan.to_luma8().get_pixel(2, 1).0, [255 - 110]);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn invert_reports_failure_but_finishes_the_batch() {
    let dir = scratch("invert-broken");
    let in_dir = dir.join("in");
    let out_dir = dir.join("out");
    std::fs::create_dir_all(&in_dir).unwrap();
    write_png(&in_dir.join("good.png"), 2, 2);
    std::fs::write(in_dir.join("broken.png"), b"not a png").unwrap();

    let code = run(
        &["invert", "--input-dir", in_dir.to_str().unwrap(), "--output-dir", out_dir.to_str().unwrap()],
        &dir.join("none.cfg"),
    );

    assert_eq!(code, ExitCode::FAILURE);
    assert!(out_dir.join("good.png").exists());
    assert!(!out_dir.join("broken.png").exists());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn discolour_to_unknown_format_fails() {
    let dir = scratch("discolour-txt");
    let input = dir.join("photo.png");
    let output = dir.join("gray.txt");
    write_png(&input, 2, 2);

    let code = run(
        &["discolour", "-i", input.to_str().unwrap(), "-o", output.to_str().unwrap()],
        &dir.join("none.cfg"),
    );

    assert_eq!(code, ExitCode::FAILURE);
    assert!(!output.exists());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn split_command_writes_one_png_per_channel() {
    let dir = scratch("split");
    let input = dir.join("photo.png");
    write_png(&input, 4, 4);
    let out = dir.join("channels");

    let code = run(&["split", "-i", input.to_str().unwrap(), "--output-dir", out.to_str().unwrap()], &dir.join("none.cfg"));
    assert_eq!(code, ExitCode::SUCCESS);

    for channel in ["Red", "Green", "Blue"] {
        assert!(out.join(format!("photo {channel}.png")).exists(), "{channel}");
    }
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn export_command_writes_png_jpeg_and_bmp() {
    let dir = scratch("export");
    let input = dir.join("photo.png");
    write_png(&input, 4, 4);
    let out = dir.join("out");

    let code = run(&["export", "-i", input.to_str().unwrap(), "--output-dir", out.to_str().unwrap()], &dir.join("none.cfg"));
    assert_eq!(code, ExitCode::SUCCESS);

    for ext in ["png", "jpg", "bmp"] {
        assert!(out.join(format!("photo.{ext}")).exists(), "{ext}");
    }
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn open_as_layer_command_builds_a_project() {
    let dir = scratch("open-as-layer");
    let base = dir.join("base.png");
    let logo = dir.join("logo.png");
    write_png(&base, 6, 6);
    write_png(&logo, 3, 2);
    let project = dir.join("combined.dcl");

    let code = run(
        &[
            "open-as-layer",
            "-i", base.to_str().unwrap(),
            "--layer", logo.to_str().unwrap(),
            "-o", project.to_str().unwrap(),
        ],
        &dir.join("none.cfg"),
    );
    assert_eq!(code, ExitCode::SUCCESS);

    let state = load_image_sync(&project, 64).unwrap();
    let names: Vec<&str> = state.layers.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, ["logo", "base"]);
    let _ = std::fs::remove_dir_all(&dir);
}
