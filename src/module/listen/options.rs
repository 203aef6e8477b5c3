use crate::module::options::{SubscriptionOptions, TransportOptions};
use structopt::StructOpt;

/// Options for the listen module
#[derive(Debug, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub transport: TransportOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub subscription: SubscriptionOptions,
}
