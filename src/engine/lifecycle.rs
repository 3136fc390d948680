//! Bet lifecycle transitions.
//!
//! A bet moves PENDING → PLACED → MATCHED and settles as WON or LOST.
//! ERROR is reachable from any non-terminal state. WON, LOST and ERROR
//! are absorbing: settled bets never change status again.

use chrono::Utc;
use tracing::debug;

use crate::types::{Bet, BetStatus, PunterError};

/// Whether `from` → `to` is a legal lifecycle edge.
pub fn is_valid_transition(from: BetStatus, to: BetStatus) -> bool {
    use BetStatus::*;
    match (from, to) {
        (Pending, Placed) => true,
        (Placed, Matched) => true,
        // Settlement can report an order as won/lost before a separate
        // matched observation ever lands.
        (Placed, Won) | (Placed, Lost) => true,
        (Matched, Won) | (Matched, Lost) => true,
        (Pending, Error) | (Placed, Error) | (Matched, Error) => true,
        _ => false,
    }
}

/// Advance a bet to `to`, stamping the bookkeeping timestamps.
///
/// Terminal states reject every outgoing edge, including self-loops,
/// so a settled bet can never be re-settled with a different outcome.
pub fn advance(bet: &mut Bet, to: BetStatus) -> Result<(), PunterError> {
    if !is_valid_transition(bet.status, to) {
        return Err(PunterError::IllegalTransition {
            from: bet.status,
            to,
        });
    }

    debug!(bet_id = %bet.id, from = %bet.status, to = %to, "Bet transition");
    let now = Utc::now();
    match to {
        BetStatus::Placed => bet.placed_at = Some(now),
        BetStatus::Won | BetStatus::Lost | BetStatus::Error => bet.settled_at = Some(now),
        _ => {}
    }
    bet.status = to;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::types::Pronostic;

    fn bet() -> Bet {
        Bet::new(
            "team-1".into(),
            "Arsenal".into(),
            "evt-1".into(),
            "Arsenal v Chelsea".into(),
            "1.234".into(),
            "101".into(),
            Pronostic::Home,
            dec!(2.0),
            dec!(100),
        )
    }

    #[test]
    fn test_happy_path_to_won() {
        let mut b = bet();
        advance(&mut b, BetStatus::Placed).unwrap();
        assert!(b.placed_at.is_some());
        advance(&mut b, BetStatus::Matched).unwrap();
        advance(&mut b, BetStatus::Won).unwrap();
        assert_eq!(b.status, BetStatus::Won);
        assert!(b.settled_at.is_some());
    }

    #[test]
    fn test_settle_directly_from_placed() {
        let mut b = bet();
        advance(&mut b, BetStatus::Placed).unwrap();
        advance(&mut b, BetStatus::Lost).unwrap();
        assert_eq!(b.status, BetStatus::Lost);
    }

    #[test]
    fn test_error_from_any_live_state() {
        for live in [BetStatus::Pending, BetStatus::Placed, BetStatus::Matched] {
            let mut b = bet();
            b.status = live;
            advance(&mut b, BetStatus::Error).unwrap();
            assert_eq!(b.status, BetStatus::Error);
        }
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        for terminal in [BetStatus::Won, BetStatus::Lost, BetStatus::Error] {
            for to in [
                BetStatus::Pending,
                BetStatus::Placed,
                BetStatus::Matched,
                BetStatus::Won,
                BetStatus::Lost,
                BetStatus::Error,
            ] {
                let mut b = bet();
                b.status = terminal;
                let err = advance(&mut b, to).unwrap_err();
                assert!(matches!(err, PunterError::IllegalTransition { .. }));
                assert_eq!(b.status, terminal, "{terminal} must stay {terminal}");
            }
        }
    }

    #[test]
    fn test_no_skipping_placement() {
        let mut b = bet();
        let err = advance(&mut b, BetStatus::Won).unwrap_err();
        assert!(matches!(
            err,
            PunterError::IllegalTransition {
                from: BetStatus::Pending,
                to: BetStatus::Won,
            }
        ));
    }

    #[test]
    fn test_no_backwards_edges() {
        let mut b = bet();
        b.status = BetStatus::Matched;
        assert!(advance(&mut b, BetStatus::Placed).is_err());
        assert!(advance(&mut b, BetStatus::Pending).is_err());
    }
}
