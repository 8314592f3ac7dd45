//! Structure-exploiting Riccati recursion for the block-banded KKT system.

mod factorization;
mod factorizer;
mod lqr_policy;
mod recursion;

pub use factorization::{
    RiccatiFactorization, SplitRiccatiFactorization, SwitchingRiccatiFactorization,
};
pub use factorizer::{RegularizationPolicy, RiccatiError, RiccatiFactorizer};
pub use lqr_policy::{LqrPolicy, StoPolicy};
pub use recursion::RiccatiRecursion;
