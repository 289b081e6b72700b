use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::util::random::{Random, RngRandom};

/// Correlates a two-way request with its response. [Ticket::NONE] marks datagrams that expect
///  no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub i64);

impl Ticket {
    pub const NONE: Ticket = Ticket(-1);

    pub fn is_none(&self) -> bool {
        *self == Ticket::NONE
    }
}

impl Display for Ticket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "<none>")
        }
        else {
            write!(f, "{:016x}", self.0)
        }
    }
}

/// Hands out tickets from an atomic counter. The counter starts at a random value in the high
///  32 bits so that independently started peers are unlikely to produce overlapping tickets.
pub struct TicketGenerator {
    counter: AtomicI64,
}

impl TicketGenerator {
    pub fn new() -> TicketGenerator {
        Self::with_random::<RngRandom>()
    }

    pub fn with_random<R: Random>() -> TicketGenerator {
        Self::starting_at((R::next_u32() as i64) << 32)
    }

    pub fn starting_at(first: i64) -> TicketGenerator {
        TicketGenerator {
            counter: AtomicI64::new(first),
        }
    }

    pub fn next_ticket(&self) -> Ticket {
        loop {
            let raw = self.counter.fetch_add(1, Ordering::Relaxed);
            if raw != Ticket::NONE.0 {
                return Ticket(raw);
            }
        }
    }
}

impl Default for TicketGenerator {
    fn default() -> Self {
        TicketGenerator::new()
    }
}
