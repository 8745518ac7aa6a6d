//! Exchange price ladders and tick arithmetic.
//!
//! A ladder is the set of prices the exchange accepts. The CLASSIC ladder
//! gets coarser as prices grow (0.01 below 2.0, 0.02 up to 3.0, ...), the
//! FINEST ladder moves in 0.01 steps everywhere. All arithmetic is done on
//! tick indices so that moving `n` ticks and back is exact.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const MIN_PRICE: Decimal = dec!(1.01);
pub const MAX_PRICE: Decimal = dec!(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Ladder {
    #[default]
    Classic,
    Finest,
}

/// Prices in `[lo, hi)` move in `step` increments.
struct Band {
    lo: Decimal,
    hi: Decimal,
    step: Decimal,
}

impl Band {
    fn ticks(&self) -> i64 {
        ((self.hi - self.lo) / self.step).to_i64().unwrap_or(0)
    }

    fn contains(&self, price: Decimal) -> bool {
        price >= self.lo && price < self.hi
    }
}

const CLASSIC_BANDS: [Band; 10] = [
    Band { lo: dec!(1.01), hi: dec!(2), step: dec!(0.01) },
    Band { lo: dec!(2), hi: dec!(3), step: dec!(0.02) },
    Band { lo: dec!(3), hi: dec!(4), step: dec!(0.05) },
    Band { lo: dec!(4), hi: dec!(6), step: dec!(0.1) },
    Band { lo: dec!(6), hi: dec!(10), step: dec!(0.2) },
    Band { lo: dec!(10), hi: dec!(20), step: dec!(0.5) },
    Band { lo: dec!(20), hi: dec!(30), step: dec!(1) },
    Band { lo: dec!(30), hi: dec!(50), step: dec!(2) },
    Band { lo: dec!(50), hi: dec!(100), step: dec!(5) },
    Band { lo: dec!(100), hi: dec!(1000), step: dec!(10) },
];

const FINEST_BANDS: [Band; 1] = [Band { lo: dec!(1.01), hi: dec!(1000), step: dec!(0.01) }];

impl Ladder {
    fn bands(self) -> &'static [Band] {
        match self {
            Ladder::Classic => &CLASSIC_BANDS,
            Ladder::Finest => &FINEST_BANDS,
        }
    }

    /// Nearest valid price, clamped to the ladder bounds.
    pub fn round(self, price: Decimal) -> Decimal {
        if price <= MIN_PRICE {
            return MIN_PRICE;
        }
        if price >= MAX_PRICE {
            return MAX_PRICE;
        }
        for band in self.bands() {
            if band.contains(price) {
                let steps = ((price - band.lo) / band.step)
                    .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
                return band.lo + steps * band.step;
            }
        }
        MAX_PRICE
    }

    #[cfg(test)]
    fn is_valid(self, price: Decimal) -> bool {
        self.index_of(price).is_some()
    }

    /// Position of a valid price on the ladder (1.01 is index 0).
    fn index_of(self, price: Decimal) -> Option<i64> {
        let mut offset = 0i64;
        for band in self.bands() {
            if band.contains(price) {
                let steps = (price - band.lo) / band.step;
                if !steps.fract().is_zero() {
                    return None;
                }
                return Some(offset + steps.to_i64()?);
            }
            offset += band.ticks();
        }
        (price == MAX_PRICE).then_some(offset)
    }

    fn price_at(self, index: i64) -> Option<Decimal> {
        if index < 0 {
            return None;
        }
        let mut remaining = index;
        for band in self.bands() {
            let count = band.ticks();
            if remaining < count {
                return Some(band.lo + Decimal::from(remaining) * band.step);
            }
            remaining -= count;
        }
        (remaining == 0).then_some(MAX_PRICE)
    }

    /// Number of ladder steps separating two prices, in either order.
    pub fn ticks_between(self, p1: Decimal, p2: Decimal) -> u32 {
        let a = self.index_of(self.round(p1)).unwrap_or(0);
        let b = self.index_of(self.round(p2)).unwrap_or(0);
        u32::try_from((a - b).unsigned_abs()).unwrap_or(u32::MAX)
    }

    /// `base` rounded onto the ladder and moved `n_ticks` steps.
    /// Returns `None` when the result would fall off either end.
    pub fn offset_price(self, base: Decimal, n_ticks: i32) -> Option<Decimal> {
        let index = self.index_of(self.round(base))?;
        self.price_at(index + i64::from(n_ticks))
    }
}

pub fn ticks_between(p1: Decimal, p2: Decimal, ladder: Ladder) -> u32 {
    ladder.ticks_between(p1, p2)
}

pub fn offset_price(base: Decimal, n_ticks: i32, ladder: Ladder) -> Option<Decimal> {
    ladder.offset_price(base, n_ticks)
}
