//! Round settlement planning.
//!
//! Planning is a pure function over the round's bets and the room's carried
//! pot: it decides every transfer before a single one is applied. The
//! engine then executes the plan against the ledger. Keeping the arithmetic
//! here, away from all I/O, is what makes the pot invariants testable.

use crate::config::EconomyConfig;
use crate::money::Money;
use crate::types::{Bet, RoundResult, UserId};

/// The complete set of transfers and pot mutations for one resolved round.
#[derive(Debug, Clone)]
pub struct SettlementPlan {
    pub result: RoundResult,
    /// Full-amount refunds (draw rounds only).
    pub refunds: Vec<(UserId, Money)>,
    /// Winner payouts, proportional to stake.
    pub payouts: Vec<(UserId, Money)>,
    /// Users whose equipped skin takes the fixed integrity damage.
    pub losers: Vec<UserId>,
    /// House cut taken before distribution.
    pub house_fee: Money,
    /// Pot distributed to winners (total pot minus the fee).
    pub net_pool: Money,
    /// Accumulated pot carried into the next round.
    pub pot_after: Money,
    /// Winnerless streak carried into the next round.
    pub streak_after: u32,
    /// Forced treasury transfer from the dispersion rule, if it fired.
    pub dispersion: Money,
}

/// Computes the settlement for one round.
///
/// - Draw: every bet refunded in full, pot and streak untouched.
/// - Winners exist: 5%-style house fee off the total pot (round pool plus
///   accumulated rollover), remainder split proportionally to stake, pot and
///   streak reset.
/// - No winners: the round pool rolls into the accumulated pot and the
///   streak increments; at the configured streak the dispersion rule moves
///   half the pot to the treasury and resets the streak.
pub fn plan_settlement(
    bets: &[Bet],
    result: RoundResult,
    round_pool: Money,
    accumulated_pot: Money,
    rollover_streak: u32,
    economy: &EconomyConfig,
) -> SettlementPlan {
    if result == RoundResult::Draw {
        return SettlementPlan {
            result,
            refunds: bets.iter().map(|b| (b.user_id.clone(), b.amount)).collect(),
            payouts: Vec::new(),
            losers: Vec::new(),
            house_fee: Money::ZERO,
            net_pool: Money::ZERO,
            pot_after: accumulated_pot,
            streak_after: rollover_streak,
            dispersion: Money::ZERO,
        };
    }

    let (winners, losers): (Vec<&Bet>, Vec<&Bet>) =
        bets.iter().partition(|b| result.beats(b.direction));
    let losers: Vec<UserId> = losers.into_iter().map(|b| b.user_id.clone()).collect();
    let total_pot = round_pool + accumulated_pot;

    if !winners.is_empty() && !total_pot.is_zero() {
        let house_fee = total_pot.mul_bp(economy.house_fee_bp);
        let net_pool = total_pot - house_fee;
        let winning_stake: Money = winners.iter().map(|b| b.amount).sum();
        let payouts = winners
            .iter()
            .map(|b| (b.user_id.clone(), net_pool.prorate(b.amount, winning_stake)))
            .collect();
        return SettlementPlan {
            result,
            refunds: Vec::new(),
            payouts,
            losers,
            house_fee,
            net_pool,
            pot_after: Money::ZERO,
            streak_after: 0,
            dispersion: Money::ZERO,
        };
    }

    // Winnerless round: the pool rolls over and the streak advances.
    let mut pot_after = total_pot;
    let mut streak_after = rollover_streak + 1;
    let mut dispersion = Money::ZERO;
    if streak_after >= economy.dispersion_streak {
        dispersion = pot_after.mul_bp(economy.dispersion_bp);
        pot_after -= dispersion;
        streak_after = 0;
    }

    SettlementPlan {
        result,
        refunds: Vec::new(),
        payouts: Vec::new(),
        losers,
        house_fee: Money::ZERO,
        net_pool: Money::ZERO,
        pot_after,
        streak_after,
        dispersion,
    }
}
