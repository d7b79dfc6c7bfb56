use crate::backend::ChatBackend;
use crate::map::facility::{Facility, Program};
use crate::map::viewport::LatLngBounds;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// The single-slot facility detail view. Rendered immediately on marker
/// click with an empty program list and the loading flag set.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub facility: Facility,
    pub programs: Vec<Program>,
    pub programs_loading: bool,
    // Identifies this click. Facility ids alone cannot: legacy flat-row
    // results all carry the default id.
    token: u64,
}

#[derive(Default)]
struct MarkerState {
    applied_seq: u64,
    facilities: Vec<Facility>,
}

/// Keeps the rendered marker set consistent with the latest facility query
/// and manages the selected-facility detail view.
///
/// The marker set is an owned value replaced wholesale per query; no
/// handles to the host map SDK leak out of this component. Both the query
/// path and the selection path guard against out-of-order async results.
pub struct MarkerReconciler {
    backend: Arc<dyn ChatBackend>,
    markers: RwLock<MarkerState>,
    selection: RwLock<Option<Selection>>,
    query_seq: AtomicU64,
    selection_seq: AtomicU64,
}

impl MarkerReconciler {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            markers: RwLock::new(MarkerState::default()),
            selection: RwLock::new(None),
            query_seq: AtomicU64::new(0),
            selection_seq: AtomicU64::new(0),
        }
    }

    /// Current marker set, one entry per facility of the latest applied
    /// query.
    pub async fn markers(&self) -> Vec<Facility> {
        self.markers.read().await.facilities.clone()
    }

    /// Replaces every previously rendered marker with the new result set,
    /// superseding any facility query still in flight.
    pub async fn set_results(&self, facilities: Vec<Facility>) {
        let seq = self.query_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.markers.write().await;
        state.applied_seq = seq;
        state.facilities = facilities;
    }

    /// Runs a bounded facility query and applies the result, unless a newer
    /// result landed in the meantime: stale responses are dropped, so the
    /// marker set always reflects the most recent request. The sequence
    /// comparison happens under the same lock as the write, so a newer
    /// result cannot slip in between check and apply.
    pub async fn refresh(&self, bounds: &LatLngBounds, category2: Option<&str>) {
        let seq = self.query_seq.fetch_add(1, Ordering::SeqCst) + 1;

        match self.backend.facilities(bounds, category2).await {
            Ok(facilities) => {
                let mut state = self.markers.write().await;
                if seq > state.applied_seq {
                    debug!(count = facilities.len(), "markers replaced");
                    state.applied_seq = seq;
                    state.facilities = facilities;
                } else {
                    debug!(seq, "stale facility query dropped");
                }
            }
            // Keep the previous markers; search failures are not surfaced.
            Err(error) => warn!(%error, "facility search failed"),
        }
    }

    /// Marker click: shows the detail view immediately with a loading
    /// affordance, then fetches the program list. The fetched list replaces
    /// the selection's programs wholesale — but only if this click is still
    /// the current selection when the fetch resolves. Legacy flat-row
    /// facilities arrive with their programs already grouped in and need no
    /// fetch (they also share the default id, which is why the guard keys
    /// on a per-click token rather than the facility id).
    pub async fn select(&self, facility: Facility) {
        let token = self.selection_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let facility_id = facility.id;

        if !facility.programs.is_empty() {
            let programs = facility.programs.clone();
            let mut selection = self.selection.write().await;
            *selection = Some(Selection {
                facility,
                programs,
                programs_loading: false,
                token,
            });
            return;
        }

        {
            let mut selection = self.selection.write().await;
            *selection = Some(Selection {
                facility,
                programs: Vec::new(),
                programs_loading: true,
                token,
            });
        }

        let programs = match self.backend.programs(facility_id).await {
            Ok(programs) => programs,
            Err(error) => {
                // The empty-state UI already says "no programs".
                debug!(%error, facility_id, "program fetch failed");
                Vec::new()
            }
        };

        let mut selection = self.selection.write().await;
        match selection.as_mut() {
            Some(current) if current.token == token => {
                current.programs = programs;
                current.programs_loading = false;
            }
            _ => debug!(facility_id, "late program result discarded"),
        }
    }

    /// Explicit close: clears the slot. An in-flight program fetch is not
    /// cancelled; its late result fails the identity check above.
    pub async fn deselect(&self) {
        let mut selection = self.selection.write().await;
        *selection = None;
    }

    pub async fn selection(&self) -> Option<Selection> {
        self.selection.read().await.clone()
    }
}
