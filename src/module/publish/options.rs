use crate::module::options::TransportOptions;
use structopt::StructOpt;

/// Options for the publish module
#[derive(Debug, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub transport: TransportOptions,

    /// Identifier of the ticket, a random one is generated when omitted
    #[structopt(long, value_name = "id")]
    pub id: Option<String>,

    /// Title of the ticket
    #[structopt(long, default_value = "", value_name = "title")]
    pub title: String,

    /// Price of the ticket
    #[structopt(long, value_name = "price")]
    pub price: f64,

    /// Identifier of the user selling the ticket
    #[structopt(long, value_name = "id")]
    pub user_id: Option<String>,

    /// Publish `ticket:updated` instead of `ticket:created` events
    #[structopt(long)]
    pub update: bool,

    /// Number of events to publish, each one with a distinct identifier unless one has been set explicitly
    #[structopt(long, default_value = "1", value_name = "count")]
    pub count: usize,
}
