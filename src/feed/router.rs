//! Fans decoded ticks out to per-symbol handler sets

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::candles::Tick;

/// Callback invoked for every tick of a watched symbol. Runs on the
/// connection's read path, so it must not block.
pub type TickHandler = Arc<dyn Fn(&Tick) + Send + Sync>;

/// Capability returned by [`TickRouter::on_tick`]; removes exactly the
/// handler it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerToken {
    symbol: String,
    id: u64,
}

impl HandlerToken {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

#[derive(Default)]
struct RouterInner {
    next_id: u64,
    // Handler ids are allocated monotonically, so iterating the BTreeMap
    // visits handlers in registration order
    routes: HashMap<String, BTreeMap<u64, TickHandler>>,
}

/// Maps incoming ticks to registered per-symbol handlers.
///
/// Ticks for symbols without handlers are dropped silently: a message may
/// already be in flight when the last handler is removed.
#[derive(Default)]
pub struct TickRouter {
    inner: Mutex<RouterInner>,
}

impl TickRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a symbol; all handlers for a symbol are
    /// invoked in registration order on every tick.
    pub fn on_tick(&self, symbol: &str, handler: TickHandler) -> HandlerToken {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .routes
            .entry(symbol.to_string())
            .or_default()
            .insert(id, handler);
        HandlerToken {
            symbol: symbol.to_string(),
            id,
        }
    }

    /// Remove the handler the token was issued for. Returns whether a
    /// handler was actually removed; spending a token twice is a no-op.
    pub fn remove(&self, token: &HandlerToken) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(handlers) = inner.routes.get_mut(&token.symbol) else {
            return false;
        };
        let removed = handlers.remove(&token.id).is_some();
        if handlers.is_empty() {
            inner.routes.remove(&token.symbol);
        }
        removed
    }

    /// Dispatch one tick to every handler registered for its symbol
    pub fn dispatch(&self, tick: &Tick) {
        let handlers: Vec<TickHandler> = {
            let inner = self.inner.lock().unwrap();
            match inner.routes.get(&tick.symbol) {
                Some(handlers) => handlers.values().cloned().collect(),
                None => {
                    trace!("no handlers for {}, tick dropped", tick.symbol);
                    return;
                }
            }
        };
        for handler in handlers {
            handler(tick);
        }
    }

    /// Drop the routing entry for one symbol, handlers included
    pub fn remove_symbol(&self, symbol: &str) {
        self.inner.lock().unwrap().routes.remove(symbol);
    }

    /// Drop every routing entry
    pub fn clear(&self) {
        self.inner.lock().unwrap().routes.clear();
    }

    pub fn handler_count(&self, symbol: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .routes
            .get(symbol)
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tick(symbol: &str, price: f64) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            ts_ms: 1_700_000_000_000,
            price,
            volume: None,
        }
    }

    #[test]
    fn test_dispatch_reaches_registered_handler() {
        let router = TickRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_handler = Arc::clone(&hits);

        router.on_tick(
            "AAPL",
            Arc::new(move |_| {
                hits_in_handler.fetch_add(1, Ordering::SeqCst);
            }),
        );

        router.dispatch(&tick("AAPL", 180.0));
        router.dispatch(&tick("AAPL", 181.0));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_symbol_is_dropped_silently() {
        let router = TickRouter::new();
        router.dispatch(&tick("TSLA", 200.0));
    }

    #[test]
    fn test_handlers_invoked_in_registration_order() {
        let router = TickRouter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            router.on_tick(
                "AAPL",
                Arc::new(move |_| {
                    order.lock().unwrap().push(label);
                }),
            );
        }

        router.dispatch(&tick("AAPL", 180.0));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_token_removes_exactly_one_handler() {
        let router = TickRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_a = Arc::clone(&hits);
        let token = router.on_tick(
            "AAPL",
            Arc::new(move |_| {
                hits_a.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let hits_b = Arc::clone(&hits);
        router.on_tick(
            "AAPL",
            Arc::new(move |_| {
                hits_b.fetch_add(10, Ordering::SeqCst);
            }),
        );

        assert!(router.remove(&token));
        assert!(!router.remove(&token), "double spend is a no-op");

        router.dispatch(&tick("AAPL", 180.0));
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_removing_last_handler_drops_routing_entry() {
        let router = TickRouter::new();
        let token = router.on_tick("AAPL", Arc::new(|_| {}));
        assert_eq!(router.handler_count("AAPL"), 1);

        router.remove(&token);
        assert_eq!(router.handler_count("AAPL"), 0);
        assert!(router.inner.lock().unwrap().routes.is_empty());
    }

    #[test]
    fn test_clear_removes_everything() {
        let router = TickRouter::new();
        router.on_tick("AAPL", Arc::new(|_| {}));
        router.on_tick("TSLA", Arc::new(|_| {}));

        router.clear();
        assert_eq!(router.handler_count("AAPL"), 0);
        assert_eq!(router.handler_count("TSLA"), 0);
    }
}
