use flex_error::define_error;

define_error! {
    #[derive(Debug, Clone)]
    Error {
        UnknownEventKind
            { name: String }
            |e| { format_args!("unknown event kind: '{}'", e.name) },
    }
}
