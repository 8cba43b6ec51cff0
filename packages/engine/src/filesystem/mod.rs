pub(crate) mod materialize;
pub(crate) mod path;
