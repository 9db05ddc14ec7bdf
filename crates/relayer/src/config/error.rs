use centralized_relay_types::NetworkId;
use flex_error::define_error;

define_error! {
    #[derive(Debug, Clone)]
    Error {
        InvalidGasPrice
            { price: String }
            |e| { format_args!("invalid gas price: {}", e.price) },

        InvalidGasAdjustment
            { value: f64 }
            |e| {
                format_args!(
                    "gas adjustment must be greater than or equal to {}, found {}",
                    super::gas_adjustment::GasAdjustment::MIN_BOUND, e.value
                )
            },

        InvalidGasBounds
            {
                min_gas: u64,
                max_gas: u64,
            }
            |e| {
                format_args!(
                    "max_gas ({}) must not be lower than min_gas ({})",
                    e.max_gas, e.min_gas
                )
            },

        MissingContractAddress
            { name: String }
            |e| { format_args!("missing or empty address for the {} contract", e.name) },

        Chain
            {
                nid: NetworkId,
                cause: Box<Error>,
            }
            |e| { format_args!("invalid configuration for chain '{}': {}", e.nid, e.cause) },
    }
}

// `define_error!` deliberately does not derive `Clone` on the generated
// wrapper struct itself (its tracer type is treated as opaque), only on the
// detail enum. The detail's `#[derive(Clone)]` still requires the wrapper to
// be `Clone` (the `Chain` variant embeds a boxed `Error`), so provide that
// impl by cloning the detail and re-deriving the trace from it.
impl Clone for Error {
    fn clone(&self) -> Self {
        use flex_error::ErrorTracer;
        Self(self.0.clone(), flex_error::DefaultTracer::new_trace(self.0.clone()))
    }
}
