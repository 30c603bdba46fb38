use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;

/// The memoized outcome of one probe, shared by every item in the batch
/// with the same input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Outcome {
    pub(crate) passed: bool,
    pub(crate) content: String,
}

impl Outcome {
    pub(crate) fn passed(content: String) -> Self {
        Self {
            passed: true,
            content,
        }
    }

    pub(crate) fn failed(content: String) -> Self {
        Self {
            passed: false,
            content,
        }
    }
}

/// Per-batch probe memo keyed by item input. The first claimant of an
/// input executes it; later claimants wait for the published outcome, so a
/// fanned-out batch still runs each distinct input at most once.
pub(crate) struct Deduplicator {
    slots: Mutex<HashMap<String, watch::Receiver<Option<Outcome>>>>,
}

pub(crate) enum Claim {
    /// This caller executes the probe and must publish through the slot.
    Lead(OutcomeSlot),
    /// Another item with the same input already leads; wait for it.
    Follow(watch::Receiver<Option<Outcome>>),
}

pub(crate) struct OutcomeSlot {
    tx: watch::Sender<Option<Outcome>>,
}

impl OutcomeSlot {
    pub(crate) fn publish(self, outcome: Outcome) {
        let _ = self.tx.send(Some(outcome));
    }
}

impl Deduplicator {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn claim(&self, input: &str) -> Claim {
        let mut slots = self.slots.lock().expect("dedup mutex poisoned");
        if let Some(rx) = slots.get(input) {
            return Claim::Follow(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        slots.insert(input.to_string(), rx);
        Claim::Lead(OutcomeSlot { tx })
    }
}

pub(crate) async fn await_outcome(mut rx: watch::Receiver<Option<Outcome>>) -> Outcome {
    loop {
        if let Some(outcome) = rx.borrow().clone() {
            return outcome;
        }
        if rx.changed().await.is_err() {
            // The lead dropped without publishing (worker cancellation).
            return Outcome::failed("memoized probe was abandoned".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Claim, Deduplicator, Outcome, await_outcome};

    #[tokio::test]
    async fn second_claim_on_the_same_input_follows_the_first() {
        let dedup = Deduplicator::new();

        let lead = match dedup.claim("echo x") {
            Claim::Lead(slot) => slot,
            Claim::Follow(_) => panic!("first claim must lead"),
        };
        let follow = match dedup.claim("echo x") {
            Claim::Follow(rx) => rx,
            Claim::Lead(_) => panic!("second claim must follow"),
        };
        assert!(matches!(dedup.claim("echo y"), Claim::Lead(_)));

        lead.publish(Outcome::passed("x\n".to_string()));
        let outcome = await_outcome(follow).await;
        assert!(outcome.passed);
        assert_eq!(outcome.content, "x\n");
    }

    #[tokio::test]
    async fn followers_survive_an_abandoned_lead() {
        let dedup = Deduplicator::new();
        let lead = match dedup.claim("echo x") {
            Claim::Lead(slot) => slot,
            Claim::Follow(_) => panic!("first claim must lead"),
        };
        let follow = match dedup.claim("echo x") {
            Claim::Follow(rx) => rx,
            Claim::Lead(_) => panic!("second claim must follow"),
        };

        drop(lead);
        let outcome = await_outcome(follow).await;
        assert!(!outcome.passed);
    }
}
