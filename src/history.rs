use std::collections::VecDeque;

use crate::canvas::{CanvasState, Layer, TiledImage};
use crate::host::LayerId;

// ============================================================================
// COMMAND TRAIT
// ============================================================================

/// Trait for undoable/redoable commands.
pub trait Command: Send + Sync {
    fn undo(&self, canvas: &mut CanvasState);
    fn redo(&self, canvas: &mut CanvasState);
    fn description(&self) -> String;
    fn memory_size(&self) -> usize;
}

// ============================================================================
// LAYER OPERATION COMMAND - For layer add/delete/rename/pixel changes
// ============================================================================

/// Types of layer operations that can be undone/redone
#[derive(Clone)]
pub enum LayerOperation {
    /// A layer was added at the given index (stores the layer as it was added)
    Add {
        index: usize,
        layer: Layer,
    },
    /// A layer was deleted (stores the full layer data for restore)
    Delete {
        index: usize,
        layer: Layer,
    },
    /// Layer was renamed
    Rename {
        id: LayerId,
        old_name: String,
        new_name: String,
    },
    /// Layer pixels were replaced wholesale (merge, clear, flushed tile writes)
    Pixels {
        id: LayerId,
        before: TiledImage,
        after: TiledImage,
    },
}

/// Command for layer structure operations
pub struct LayerOpCommand {
    operation: LayerOperation,
}

impl LayerOpCommand {
    pub fn new(operation: LayerOperation) -> Self {
        Self { operation }
    }
}

impl Command for LayerOpCommand {
    fn undo(&self, canvas: &mut CanvasState) {
        match &self.operation {
            LayerOperation::Add { layer, .. } => {
                // Undo add = remove the layer
                canvas.detach_unrecorded(layer.id);
            }
            LayerOperation::Delete { index, layer } => {
                // Undo delete = restore the layer
                canvas.attach_unrecorded(*index, layer.clone());
            }
            LayerOperation::Rename { id, old_name, .. } => {
                if let Some(layer) = canvas.layer_mut(*id) {
                    layer.name = old_name.clone();
                }
            }
            LayerOperation::Pixels { id, before, .. } => {
                if let Some(layer) = canvas.layer_mut(*id) {
                    layer.pixels = before.clone();
                }
            }
        }

        canvas.mark_dirty(None);
    }

    fn redo(&self, canvas: &mut CanvasState) {
        match &self.operation {
            LayerOperation::Add { index, layer } => {
                canvas.attach_unrecorded(*index, layer.clone());
            }
            LayerOperation::Delete { layer, .. } => {
                canvas.detach_unrecorded(layer.id);
            }
            LayerOperation::Rename { id, new_name, .. } => {
                if let Some(layer) = canvas.layer_mut(*id) {
                    layer.name = new_name.clone();
                }
            }
            LayerOperation::Pixels { id, after, .. } => {
                if let Some(layer) = canvas.layer_mut(*id) {
                    layer.pixels = after.clone();
                }
            }
        }

        canvas.mark_dirty(None);
    }

    fn description(&self) -> String {
        match &self.operation {
            LayerOperation::Add { layer, .. } => format!("Add Layer: {}", layer.name),
            LayerOperation::Delete { layer, .. } => format!("Delete Layer: {}", layer.name),
            LayerOperation::Rename { old_name, new_name, .. } => {
                format!("Rename: {} → {}", old_name, new_name)
            }
            LayerOperation::Pixels { id, .. } => format!("Edit Pixels: layer {}", id),
        }
    }

    fn memory_size(&self) -> usize {
        match &self.operation {
            LayerOperation::Add { layer, .. } | LayerOperation::Delete { layer, .. } => {
                layer.pixels.memory_bytes() + layer.name.len()
            }
            LayerOperation::Rename { old_name, new_name, .. } => old_name.len() + new_name.len(),
            LayerOperation::Pixels { before, after, .. } => {
                before.memory_bytes() + after.memory_bytes()
            }
        }
    }
}

// ============================================================================
// GROUP COMMAND - several commands undone/redone as one step
// ============================================================================

pub struct GroupCommand {
    description: String,
    commands: Vec<Box<dyn Command>>,
}

impl GroupCommand {
    pub fn new(description: String, commands: Vec<Box<dyn Command>>) -> Self {
        Self { description, commands }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Command for GroupCommand {
    fn undo(&self, canvas: &mut CanvasState) {
        for cmd in self.commands.iter().rev() {
            cmd.undo(canvas);
        }
    }

    fn redo(&self, canvas: &mut CanvasState) {
        for cmd in &self.commands {
            cmd.redo(canvas);
        }
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.commands.iter().map(|c| c.memory_size()).sum()
    }
}

// ============================================================================
// HISTORY MANAGER - Manages undo/redo stacks with memory limits
// ============================================================================

/// Undo/redo history manager with memory limits.
pub struct HistoryManager {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: VecDeque<Box<dyn Command>>,
    max_history_size: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size,
            max_memory_bytes: Some(256 * 1024 * 1024),
            total_memory: 0,
        }
    }

    pub fn set_max_history_size(&mut self, max: usize) {
        self.max_history_size = max;
        self.prune();
    }

    pub fn push(&mut self, command: Box<dyn Command>) {
        // Clear redo stack when a new action is performed
        for cmd in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(cmd.memory_size());
        }

        self.total_memory += command.memory_size();
        self.undo_stack.push_back(command);

        self.prune();
    }

    pub fn undo(&mut self, canvas: &mut CanvasState) -> Option<String> {
        let command = self.undo_stack.pop_back()?;
        let description = command.description();
        command.undo(canvas);
        self.redo_stack.push_back(command);
        Some(description)
    }

    pub fn redo(&mut self, canvas: &mut CanvasState) -> Option<String> {
        let command = self.redo_stack.pop_back()?;
        let description = command.description();
        command.redo(canvas);
        self.undo_stack.push_back(command);
        Some(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    /// Get all undo descriptions (most recent first)
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(|c| c.description()).collect()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    /// Prune old commands to stay within limits
    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }

        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }
}
