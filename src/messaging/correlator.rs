use std::sync::Mutex;

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::messaging::error::{CallResult, FunctionError};
use crate::messaging::ticket::Ticket;

/// Keeps track of two-way requests that are waiting for their response.
///
/// Each pending request is completed exactly once: by [TicketCorrelator::resolve] when the
///  response arrives, by [TicketCorrelator::expire] when the transport gives up, or by
///  [TicketCorrelator::abandon] if the request could not be sent in the first place. Whichever
///  comes first removes the entry; the others find nothing and return `false`.
///
/// The correlator does not time out anything on its own. Bounding the lifetime of entries is the
///  transport's job through its retry budget.
pub struct TicketCorrelator<T> {
    pending: Mutex<FxHashMap<Ticket, oneshot::Sender<CallResult<T>>>>,
}

/// The caller's side of a pending request.
pub struct PendingResponse<T> {
    ticket: Ticket,
    receiver: oneshot::Receiver<CallResult<T>>,
}

impl <T> PendingResponse<T> {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub async fn outcome(self) -> CallResult<T> {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!("pending response for ticket {} was discarded", self.ticket);
                Err(FunctionError::Error)
            }
        }
    }
}

impl <T: Send> TicketCorrelator<T> {
    pub fn new() -> TicketCorrelator<T> {
        TicketCorrelator {
            pending: Default::default(),
        }
    }

    pub fn await_response(&self, ticket: Ticket) -> PendingResponse<T> {
        let (sender, receiver) = oneshot::channel();
        let prev = self.pending.lock().unwrap()
            .insert(ticket, sender);
        if prev.is_some() {
            // the replaced caller sees its channel closed, i.e. an error
            warn!("ticket {} was already pending - replacing", ticket);
        }

        PendingResponse {
            ticket,
            receiver,
        }
    }

    pub fn resolve(&self, ticket: Ticket, result: T) -> bool {
        self.complete(ticket, Ok(result))
    }

    pub fn expire(&self, ticket: Ticket) -> bool {
        self.complete(ticket, Err(FunctionError::Timeout))
    }

    pub fn abandon(&self, ticket: Ticket) -> bool {
        self.complete(ticket, Err(FunctionError::Error))
    }

    pub fn num_pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    fn complete(&self, ticket: Ticket, outcome: CallResult<T>) -> bool {
        // look up and remove in a single step, then notify outside the lock
        let sender = self.pending.lock().unwrap()
            .remove(&ticket);

        match sender {
            Some(sender) => {
                trace!("completing ticket {}", ticket);
                if sender.send(outcome).is_err() {
                    debug!("caller for ticket {} is no longer waiting", ticket);
                }
                true
            }
            None => {
                trace!("ticket {} is not pending - ignoring", ticket);
                false
            }
        }
    }
}

impl <T: Send> Default for TicketCorrelator<T> {
    fn default() -> Self {
        TicketCorrelator::new()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use rstest::rstest;

    #[derive(Debug, Clone, Copy)]
    enum Trigger {
        Resolve,
        Expire,
        Abandon,
    }

    fn fire(correlator: &TicketCorrelator<u32>, ticket: Ticket, trigger: Trigger) -> bool {
        match trigger {
            Trigger::Resolve => correlator.resolve(ticket, 42),
            Trigger::Expire => correlator.expire(ticket),
            Trigger::Abandon => correlator.abandon(ticket),
        }
    }

    #[rstest]
    #[case::resolve_first(Trigger::Resolve, Trigger::Expire, Ok(42))]
    #[case::expire_first(Trigger::Expire, Trigger::Resolve, Err(FunctionError::Timeout))]
    #[case::abandon_first(Trigger::Abandon, Trigger::Resolve, Err(FunctionError::Error))]
    #[case::resolve_twice(Trigger::Resolve, Trigger::Resolve, Ok(42))]
    #[case::expire_twice(Trigger::Expire, Trigger::Expire, Err(FunctionError::Timeout))]
    #[tokio::test]
    async fn test_exactly_once(#[case] first: Trigger, #[case] second: Trigger, #[case] expected: CallResult<u32>) {
        let correlator = TicketCorrelator::new();
        let pending = correlator.await_response(Ticket(7));
        assert_eq!(pending.ticket(), Ticket(7));
        assert_eq!(correlator.num_pending(), 1);

        assert!(fire(&correlator, Ticket(7), first));
        assert!(!fire(&correlator, Ticket(7), second));
        assert_eq!(correlator.num_pending(), 0);

        assert_eq!(pending.outcome().await, expected);
    }

    #[rstest]
    #[case::resolve(Trigger::Resolve)]
    #[case::expire(Trigger::Expire)]
    #[case::abandon(Trigger::Abandon)]
    fn test_unknown_ticket(#[case] trigger: Trigger) {
        let correlator = TicketCorrelator::new();
        let _pending = correlator.await_response(Ticket(1));
        assert!(!fire(&correlator, Ticket(2), trigger));
        assert_eq!(correlator.num_pending(), 1);
    }

    #[tokio::test]
    async fn test_independent_tickets() {
        let correlator = TicketCorrelator::new();
        let first = correlator.await_response(Ticket(1));
        let second = correlator.await_response(Ticket(2));

        assert!(correlator.resolve(Ticket(2), 2));
        assert!(correlator.resolve(Ticket(1), 1));

        assert_eq!(second.outcome().await, Ok(2));
        assert_eq!(first.outcome().await, Ok(1));
    }

    #[tokio::test]
    async fn test_caller_gone() {
        let correlator = TicketCorrelator::<u32>::new();
        drop(correlator.await_response(Ticket(1)));
        assert!(correlator.resolve(Ticket(1), 1));
    }

    #[tokio::test]
    async fn test_replaced_ticket() {
        let correlator = TicketCorrelator::new();
        let first = correlator.await_response(Ticket(1));
        let second = correlator.await_response(Ticket(1));
        assert_eq!(correlator.num_pending(), 1);

        assert!(correlator.resolve(Ticket(1), 5));
        assert_eq!(first.outcome().await, Err(FunctionError::Error));
        assert_eq!(second.outcome().await, Ok(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_resolve_and_expire() {
        let correlator = Arc::new(TicketCorrelator::new());

        for i in 0..200 {
            let ticket = Ticket(i);
            let pending = correlator.await_response(ticket);

            let c1 = correlator.clone();
            let c2 = correlator.clone();
            let resolver = tokio::spawn(async move { c1.resolve(ticket, 1) });
            let expirer = tokio::spawn(async move { c2.expire(ticket) });

            let resolved = resolver.await.unwrap();
            let expired = expirer.await.unwrap();
            assert!(resolved ^ expired);

            let outcome = pending.outcome().await;
            if resolved {
                assert_eq!(outcome, Ok(1));
            }
            else {
                assert_eq!(outcome, Err(FunctionError::Timeout));
            }
        }
        assert_eq!(correlator.num_pending(), 0);
    }
}
