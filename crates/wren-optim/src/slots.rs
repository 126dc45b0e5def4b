// Per-variable optimizer state, created lazily as zeros shaped like the
// variable the first time an update sees it.

use std::collections::HashMap;

use wren_core::Tensor;
use wren_graph::NodeId;

#[derive(Debug, Default, Clone)]
pub(crate) struct Slots {
    slots: HashMap<NodeId, Tensor>,
}

impl Slots {
    pub(crate) fn get_or_zeros(&mut self, id: NodeId, like: &Tensor) -> &mut [f32] {
        self.slots
            .entry(id)
            .or_insert_with(|| like.zeros_like())
            .data_mut()
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Tensor> {
        self.slots.get(&id)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }
}
