//! Memoized inverse-evaluation results, guarded against reentrant use
use super::{ElementXi, FindXiSettings, SearchScope};
use crate::{Error, mesh::ElementId};
use log::{debug, warn};

/// Inputs which identify an inverse evaluation
#[derive(Clone, Debug)]
pub(crate) struct FindXiKey {
    target: Vec<f64>,
    scope: SearchScope,
    element_dimension: Option<usize>,
    find_nearest: bool,
    tolerance: f64,
}

impl FindXiKey {
    pub fn new(
        target: &[f64],
        scope: &SearchScope,
        settings: &FindXiSettings,
    ) -> Result<Self, Error> {
        let mut t = Vec::new();
        t.try_reserve_exact(target.len())?;
        t.extend_from_slice(target);
        Ok(Self {
            target: t,
            scope: scope.clone(),
            element_dimension: settings.element_dimension,
            find_nearest: settings.find_nearest,
            tolerance: settings.tolerance,
        })
    }

    /// Checks for an exact match, comparing floats bit-for-bit
    fn matches(&self, other: &Self) -> bool {
        self.target.len() == other.target.len()
            && self
                .target
                .iter()
                .zip(&other.target)
                .all(|(a, b)| a.to_bits() == b.to_bits())
            && self.scope == other.scope
            && self.element_dimension == other.element_dimension
            && self.find_nearest == other.find_nearest
            && self.tolerance.to_bits() == other.tolerance.to_bits()
    }
}

/// A finished search; `outcome` is `None` if nothing was found
#[derive(Clone, Debug)]
pub(crate) struct FindXiCache {
    key: FindXiKey,
    outcome: Option<ElementXi>,
}

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Empty,
    Ready(FindXiCache),
    /// A search is running; `stale` is set if the field was invalidated
    /// while it ran
    InUse { stale: bool },
}

/// Per-field inverse-evaluation cache slot
///
/// While a search is in flight the slot is marked as in use: a second
/// search on the same field is refused, and invalidation only marks the
/// slot as stale so that the running search drops its result.
#[derive(Debug, Default)]
pub(crate) struct FindXiSlot {
    state: SlotState,
    /// Most recent successful element, tried first by the next search
    last_element: Option<ElementId>,
}

/// Outcome of [`FindXiSlot::begin`]
pub(crate) enum Begin {
    /// The previous search had identical inputs
    Cached(Option<ElementXi>),
    /// A new search must run; the slot is now in use
    Search {
        hint: Option<ElementId>,
        previous: Option<FindXiCache>,
    },
}

impl FindXiSlot {
    pub fn is_in_use(&self) -> bool {
        matches!(self.state, SlotState::InUse { .. })
    }

    /// Claims the slot for a search, or returns a memoized result
    pub fn begin(&mut self, key: &FindXiKey) -> Result<Begin, Error> {
        match std::mem::take(&mut self.state) {
            SlotState::InUse { stale } => {
                self.state = SlotState::InUse { stale };
                Err(Error::CacheInUse)
            }
            SlotState::Ready(c) if c.key.matches(key) => {
                let out = c.outcome.clone();
                self.state = SlotState::Ready(c);
                Ok(Begin::Cached(out))
            }
            prev => {
                self.state = SlotState::InUse { stale: false };
                Ok(Begin::Search {
                    hint: self.last_element,
                    previous: match prev {
                        SlotState::Ready(c) => Some(c),
                        _ => None,
                    },
                })
            }
        }
    }

    /// Releases the slot after a search
    ///
    /// Successful searches (including "not found") are stored; on error, the
    /// previous result is restored.  Either way, a stale slot ends up empty.
    pub fn finish(
        &mut self,
        name: &str,
        key: FindXiKey,
        result: &Result<Option<ElementXi>, Error>,
        previous: Option<FindXiCache>,
    ) {
        let stale = matches!(self.state, SlotState::InUse { stale: true });
        if let Ok(Some(found)) = result {
            self.last_element = Some(found.element);
        }
        self.state = if stale {
            debug!("discarding stale find_element_xi result for `{name}`");
            SlotState::Empty
        } else {
            match (result, previous) {
                (Ok(outcome), _) => SlotState::Ready(FindXiCache {
                    key,
                    outcome: outcome.clone(),
                }),
                (Err(..), Some(prev)) => SlotState::Ready(prev),
                (Err(..), None) => SlotState::Empty,
            }
        };
    }

    /// Drops any memoized result
    pub fn invalidate(&mut self, name: &str) {
        match &mut self.state {
            SlotState::InUse { stale } => {
                warn!(
                    "field `{name}` invalidated during find_element_xi; \
                     the result of the running search will be discarded"
                );
                *stale = true;
            }
            s => *s = SlotState::Empty,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn key(t: f64) -> FindXiKey {
        FindXiKey::new(&[t], &SearchScope::Mesh, &FindXiSettings::default())
            .unwrap()
    }

    fn found(e: u32) -> Option<ElementXi> {
        Some(ElementXi {
            element: ElementId::new(e),
            xi: [0.5].into_iter().collect(),
        })
    }

    #[test]
    fn memoizes() {
        let mut slot = FindXiSlot::default();
        let Begin::Search { hint, previous } = slot.begin(&key(1.0)).unwrap()
        else {
            panic!("empty slot should search");
        };
        assert!(hint.is_none() && previous.is_none());
        assert!(slot.is_in_use());
        slot.finish("f", key(1.0), &Ok(found(3)), previous);
        assert!(!slot.is_in_use());

        let Begin::Cached(c) = slot.begin(&key(1.0)).unwrap() else {
            panic!("identical inputs should hit");
        };
        assert_eq!(c, found(3));

        // Different inputs search again, with the last element as a hint
        let Begin::Search { hint, previous } = slot.begin(&key(2.0)).unwrap()
        else {
            panic!("new target should search");
        };
        assert_eq!(hint, Some(ElementId::new(3)));
        assert!(previous.is_some());
        slot.finish("f", key(2.0), &Ok(None), previous);
        let Begin::Cached(c) = slot.begin(&key(2.0)).unwrap() else {
            panic!("not-found results are cached too");
        };
        assert!(c.is_none());
    }

    #[test]
    fn in_use_guard() {
        let mut slot = FindXiSlot::default();
        let Begin::Search { previous, .. } = slot.begin(&key(1.0)).unwrap()
        else {
            panic!();
        };
        assert!(matches!(slot.begin(&key(1.0)), Err(Error::CacheInUse)));

        // Invalidating mid-search marks the result as stale
        slot.invalidate("f");
        assert!(slot.is_in_use());
        slot.finish("f", key(1.0), &Ok(found(2)), previous);
        assert!(matches!(
            slot.begin(&key(1.0)).unwrap(),
            Begin::Search { .. }
        ));
    }

    #[test]
    fn error_restores_previous() {
        let mut slot = FindXiSlot::default();
        let Begin::Search { previous, .. } = slot.begin(&key(1.0)).unwrap()
        else {
            panic!();
        };
        slot.finish("f", key(1.0), &Ok(found(1)), previous);
        let Begin::Search { previous, .. } = slot.begin(&key(5.0)).unwrap()
        else {
            panic!();
        };
        slot.finish("f", key(5.0), &Err(Error::SingularMatrix), previous);
        assert!(matches!(slot.begin(&key(1.0)).unwrap(), Begin::Cached(..)));
    }
}
