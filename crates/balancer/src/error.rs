/// Errors raised while selecting or configuring a load-balancing strategy
/// (§4.7, §7, §9).
#[derive(Debug, thiserror::Error)]
pub enum BalancerError {
    /// Every strategy fails the same way when the healthy target list is empty.
    #[error("no healthy targets available")]
    NoTargetsAvailable,

    /// The `Hash` strategy was selected for an endpoint that never supplied
    /// a key selector (§9: "callers that cannot provide one must not select
    /// the Hash strategy").
    #[error("hash load-balancing strategy requires a key selector")]
    MissingKeySelector,
}
