use std::sync::atomic::{AtomicBool, Ordering};

/// Tracks whether a response has been finalized.
///
/// A response concludes when its header goes out or when its connection dies. Code
/// paths racing to finish the same response (an authorizer answering on its own, a
/// timeout, a chunked writer) check the observer before writing and only the first
/// [`ConclusionObserver::conclude`] wins.
#[derive(Debug)]
pub struct ConclusionObserver {
    alive: AtomicBool,
    concluded: AtomicBool,
}

impl Default for ConclusionObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConclusionObserver {
    pub fn new() -> Self {
        Self { alive: AtomicBool::new(true), concluded: AtomicBool::new(false) }
    }

    /// False once the connection behind the response has been stopped.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn has_concluded(&self) -> bool {
        self.concluded.load(Ordering::Acquire) || !self.is_alive()
    }

    /// Marks the response concluded. Only the first caller gets `true`.
    pub fn conclude(&self) -> bool {
        !self.concluded.swap(true, Ordering::AcqRel)
    }

    pub fn has_died(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn only_one_conclusion_wins() {
        let observer = Arc::new(ConclusionObserver::new());
        let winners: usize = (0..8)
            .map(|_| {
                let observer = Arc::clone(&observer);
                std::thread::spawn(move || observer.conclude())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| usize::from(t.join().unwrap()))
            .sum();

        assert_eq!(winners, 1);
        assert!(observer.has_concluded());
        assert!(observer.is_alive());
    }

    #[test]
    fn death_counts_as_conclusion() {
        let observer = ConclusionObserver::new();
        observer.has_died();

        assert!(observer.has_concluded());
        assert!(observer.conclude());
    }
}
