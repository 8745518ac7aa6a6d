//! Lay stake sizing.
//!
//! The stake table expresses risk as a percentage of the available balance
//! that we are willing to lose. For a lay bet that loss is the liability:
//!   liability = balance · stake_percent / 100
//!   stake     = liability / (price − 1)
//! so the stake shrinks as the lay price grows.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::error::StakeError;

/// Liability for a given percentage of the balance.
pub fn liability(balance: Decimal, stake_percent: Decimal) -> Decimal {
    balance * stake_percent / dec!(100)
}

/// Backer's stake that produces `liability` at `price`.
pub fn stake_for_liability(liability: Decimal, price: Decimal) -> Result<Decimal, StakeError> {
    if price <= Decimal::ONE {
        return Err(StakeError::InvalidPrice(price));
    }
    Ok(liability / (price - Decimal::ONE))
}

/// Stake and liability as sent to the exchange (2 dp).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StakePlan {
    pub price: Decimal,
    pub stake: Decimal,
    pub liability: Decimal,
}

pub fn plan_stake(
    balance: Decimal,
    stake_percent: Decimal,
    price: Decimal,
) -> Result<StakePlan, StakeError> {
    let liability = liability(balance, stake_percent);
    if balance <= Decimal::ZERO || liability > balance {
        return Err(StakeError::InsufficientFunds { liability, balance });
    }
    let stake = stake_for_liability(liability, price)?;
    Ok(StakePlan {
        price,
        stake: to_cents(stake),
        liability: to_cents(liability),
    })
}

fn to_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rust_decimal::prelude::ToPrimitive;

    #[test]
    fn test_liability_from_percent() {
        assert_eq!(liability(dec!(300), dec!(5)), dec!(15.00));
        assert_eq!(liability(dec!(1234.56), dec!(2.5)), dec!(30.864));
    }

    #[test]
    fn test_stake_at_three_twenty() {
        // 15 / 2.2 = 6.8181...
        let stake = stake_for_liability(dec!(15), dec!(3.20)).unwrap();
        assert_relative_eq!(stake.to_f64().unwrap(), 6.818181818, epsilon = 1e-9);
    }

    #[test]
    fn test_plan_rounds_to_cents() {
        let plan = plan_stake(dec!(300), dec!(5), dec!(3.20)).unwrap();
        assert_eq!(plan.liability, dec!(15.00));
        assert_eq!(plan.stake, dec!(6.82));
        assert_eq!(plan.price, dec!(3.20));
    }

    #[test]
    fn test_insufficient_funds() {
        assert!(matches!(
            plan_stake(dec!(100), dec!(120), dec!(2.0)),
            Err(StakeError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            plan_stake(dec!(0), dec!(5), dec!(2.0)),
            Err(StakeError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_price_of_one_rejected() {
        assert_eq!(
            stake_for_liability(dec!(10), dec!(1)),
            Err(StakeError::InvalidPrice(dec!(1)))
        );
    }
}
