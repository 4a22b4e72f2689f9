//! Move-only reference-count tokens.

use std::fmt;
use std::sync::Arc;

use cadence_core::TaskId;

use crate::light::LightTask;
use crate::manager::GraphShared;

enum HoldTarget {
    Node {
        graph: Arc<GraphShared>,
        id: TaskId,
        epoch: u64,
    },
    Light(Arc<LightTask>),
}

/// One unit of a reference count on a graph row or a [`LightTask`].
///
/// While a hold exists its target cannot run. Releasing it, explicitly
/// with [`release`](Hold::release) or by dropping it, decrements the
/// count exactly once; the target is dispatched when its count reaches
/// zero. A hold on a row of a graph that has since been reset is ignored
/// (with a warning) when released.
///
/// Physics engines receive their completion signal as a `Hold` and
/// release it when the step they were asked to run has finished.
#[must_use = "dropping a Hold releases it immediately"]
pub struct Hold {
    target: Option<HoldTarget>,
}

impl Hold {
    pub(crate) fn node(graph: Arc<GraphShared>, id: TaskId, epoch: u64) -> Self {
        Self {
            target: Some(HoldTarget::Node { graph, id, epoch }),
        }
    }

    pub(crate) fn light(task: Arc<LightTask>) -> Self {
        Self {
            target: Some(HoldTarget::Light(task)),
        }
    }

    /// Release the hold now.
    pub fn release(mut self) {
        self.release_inner();
    }

    /// Name of the task this hold gates.
    pub fn target_name(&self) -> String {
        match &self.target {
            Some(HoldTarget::Node { graph, id, .. }) => graph.row_name(*id),
            Some(HoldTarget::Light(task)) => task.label().to_string(),
            None => String::new(),
        }
    }

    fn release_inner(&mut self) {
        match self.target.take() {
            Some(HoldTarget::Node { graph, id, epoch }) => graph.release(id, epoch),
            Some(HoldTarget::Light(task)) => task.release_reference(),
            None => {}
        }
    }
}

impl Drop for Hold {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for Hold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(HoldTarget::Node { id, epoch, .. }) => f
                .debug_struct("Hold")
                .field("node", id)
                .field("epoch", epoch)
                .finish(),
            Some(HoldTarget::Light(task)) => {
                f.debug_struct("Hold").field("light", &task.label()).finish()
            }
            None => f.debug_struct("Hold").field("released", &true).finish(),
        }
    }
}
