use std::sync::{Arc, Mutex};

use super::lock;

pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Append-only record of announcements with replay-on-subscribe.
///
/// A listener added after N announcements first receives those N, in arrival
/// order, and only then anything announced later. Duplicates are kept as they
/// arrived. Listeners must not subscribe to the same registry from inside a
/// callback.
pub struct Registry<T> {
    delivery: Mutex<()>,
    state: Mutex<State<T>>,
}

struct State<T> {
    history: Vec<T>,
    listeners: Vec<Listener<T>>,
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self {
            delivery: Mutex::new(()),
            state: Mutex::new(State {
                history: Vec::new(),
                listeners: Vec::new(),
            }),
        }
    }

    pub fn announce(&self, item: T) {
        let _delivery = lock(&self.delivery);
        let listeners = {
            let mut state = lock(&self.state);
            state.history.push(item.clone());
            state.listeners.clone()
        };
        for listener in listeners {
            listener(&item);
        }
    }

    pub fn subscribe(&self, listener: Listener<T>) {
        let _delivery = lock(&self.delivery);
        let history = {
            let mut state = lock(&self.state);
            state.listeners.push(Arc::clone(&listener));
            state.history.clone()
        };
        for item in &history {
            listener(item);
        }
    }

    pub fn snapshot(&self) -> Vec<T> {
        lock(&self.state).history.clone()
    }
}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn collector() -> (Arc<Mutex<Vec<u32>>>, Listener<u32>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, Arc::new(move |item: &u32| sink.lock().unwrap().push(*item)))
    }

    #[test]
    fn late_listener_gets_replay_before_new_items() {
        let registry = Registry::new();
        registry.announce(1);
        registry.announce(2);
        registry.announce(3);

        let (seen, listener) = collector();
        registry.subscribe(listener);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);

        registry.announce(4);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn every_listener_receives_announcements() {
        let registry = Registry::new();
        let (first, first_listener) = collector();
        let (second, second_listener) = collector();
        registry.subscribe(first_listener);
        registry.subscribe(second_listener);

        registry.announce(7);

        assert_eq!(*first.lock().unwrap(), vec![7]);
        assert_eq!(*second.lock().unwrap(), vec![7]);
    }

    #[test]
    fn duplicates_are_appended() {
        let registry = Registry::new();
        registry.announce(5);
        registry.announce(5);

        assert_eq!(registry.snapshot(), vec![5, 5]);
    }

    #[test]
    fn listener_may_read_snapshot() {
        let registry = Arc::new(Registry::new());
        let observed = Arc::new(Mutex::new(0));

        let inner = Arc::clone(&registry);
        let count = Arc::clone(&observed);
        registry.subscribe(Arc::new(move |_: &u32| {
            *count.lock().unwrap() = inner.snapshot().len();
        }));
        registry.announce(1);
        registry.announce(2);

        assert_eq!(*observed.lock().unwrap(), 2);
    }
}
