use std::future::Future;
use std::sync::Arc;

use crate::amount::Amount;
use crate::error::PayError;
use crate::proof::PaymentProof;

/// External payment capability. Key custody and transaction signing live
/// behind this trait; the protocol only ever asks it to pay.
pub trait Wallet: Send + Sync {
    /// Pay `amount` of `asset` to `recipient` and return the resulting proof.
    /// `memo` binds the payment to a challenge where the backend supports it.
    fn pay(
        &self,
        recipient: &str,
        amount: Amount,
        asset: &str,
        memo: Option<&str>,
    ) -> impl Future<Output = Result<PaymentProof, PayError>> + Send;
}

impl<W: Wallet> Wallet for Arc<W> {
    fn pay(
        &self,
        recipient: &str,
        amount: Amount,
        asset: &str,
        memo: Option<&str>,
    ) -> impl Future<Output = Result<PaymentProof, PayError>> + Send {
        (**self).pay(recipient, amount, asset, memo)
    }
}
