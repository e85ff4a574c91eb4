//! External exchange-rate source port.

use crate::domain::money::Currency;

/// One rate provider. Absence of a rate is signaled as `None`; a source never
/// lets an error escape its own boundary.
pub trait RateSource {
    fn name(&self) -> &str;
    fn fetch(&self, from: Currency, to: Currency) -> Option<f64>;
}
