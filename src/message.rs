//! Bodies of the charger's response frames, one module per command.

pub(crate) mod charge_info_message;
pub(crate) mod dev_info_message;
