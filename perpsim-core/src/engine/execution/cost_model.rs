//! Slippage and fee models.
//!
//! Slippage is directional: buyers pay more, sellers receive less.
//! Fees are charged on executed notional at the taker rate.

use crate::config::{FeeConfig, SlippageConfig};
use crate::domain::OrderSide;
use rust_decimal::Decimal;
use std::fmt::Debug;

const BPS_DENOMINATOR: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Price adjustment for a fill: `(reference_price, quantity, side) → signed delta`.
pub trait SlippageModel: Debug + Send + Sync {
    fn slippage(&self, reference_price: Decimal, quantity: Decimal, side: OrderSide) -> Decimal;
}

/// Fee for a fill: `(execution_price, quantity) → fee`.
pub trait FeeModel: Debug + Send + Sync {
    fn fee(&self, execution_price: Decimal, quantity: Decimal) -> Decimal;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoSlippage;

impl SlippageModel for NoSlippage {
    fn slippage(&self, _: Decimal, _: Decimal, _: OrderSide) -> Decimal {
        Decimal::ZERO
    }
}

/// `price × bps / 10000`, positive for buys, negative for sells.
#[derive(Debug, Clone, Copy)]
pub struct FixedBpsSlippage {
    pub bps: Decimal,
}

impl SlippageModel for FixedBpsSlippage {
    fn slippage(&self, reference_price: Decimal, _quantity: Decimal, side: OrderSide) -> Decimal {
        let adjustment = reference_price * self.bps / BPS_DENOMINATOR;
        match side {
            OrderSide::Buy => adjustment,
            OrderSide::Sell => -adjustment,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroFee;

impl FeeModel for ZeroFee {
    fn fee(&self, _: Decimal, _: Decimal) -> Decimal {
        Decimal::ZERO
    }
}

/// Maker/taker schedule. Every simulated fill pays the taker rate;
/// the maker rate is carried for reporting only.
#[derive(Debug, Clone, Copy)]
pub struct TakerFee {
    pub maker_rate: Decimal,
    pub taker_rate: Decimal,
}

impl FeeModel for TakerFee {
    fn fee(&self, execution_price: Decimal, quantity: Decimal) -> Decimal {
        execution_price * quantity * self.taker_rate
    }
}

pub fn slippage_from_config(config: &SlippageConfig) -> Box<dyn SlippageModel> {
    match config {
        SlippageConfig::None => Box::new(NoSlippage),
        SlippageConfig::FixedBps { bps } if bps.is_zero() => Box::new(NoSlippage),
        SlippageConfig::FixedBps { bps } => Box::new(FixedBpsSlippage { bps: *bps }),
    }
}

pub fn fee_from_config(config: &FeeConfig) -> Box<dyn FeeModel> {
    if config.taker_rate.is_zero() {
        return Box::new(ZeroFee);
    }
    Box::new(TakerFee {
        maker_rate: config.maker_rate,
        taker_rate: config.taker_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn buy_slippage_increases_price() {
        let model = FixedBpsSlippage { bps: dec!(10) };
        assert_eq!(model.slippage(dec!(100), dec!(1), OrderSide::Buy), dec!(0.1));
    }

    #[test]
    fn sell_slippage_decreases_price() {
        let model = FixedBpsSlippage { bps: dec!(10) };
        assert_eq!(model.slippage(dec!(100), dec!(1), OrderSide::Sell), dec!(-0.1));
    }

    #[test]
    fn taker_fee_on_notional() {
        let model = TakerFee {
            maker_rate: dec!(0.0002),
            taker_rate: dec!(0.0004),
        };
        assert_eq!(model.fee(dec!(100), dec!(5)), dec!(0.2));
    }

    #[test]
    fn frictionless_models() {
        assert_eq!(NoSlippage.slippage(dec!(100), dec!(1), OrderSide::Buy), Decimal::ZERO);
        assert_eq!(ZeroFee.fee(dec!(100), dec!(1)), Decimal::ZERO);
    }

    #[test]
    fn built_from_config() {
        let slip = slippage_from_config(&SlippageConfig::FixedBps { bps: dec!(5) });
        assert_eq!(slip.slippage(dec!(200), dec!(1), OrderSide::Buy), dec!(0.1));

        let fee = fee_from_config(&FeeConfig {
            maker_rate: dec!(0.0002),
            taker_rate: dec!(0.001),
        });
        assert_eq!(fee.fee(dec!(50), dec!(2)), dec!(0.1));
        assert_eq!(fee_from_config(&FeeConfig::default()).fee(dec!(50), dec!(2)), Decimal::ZERO);
    }
}
