mod command;
mod frame;
mod varint;

pub use command::Command;
pub use frame::{CommandId, Header, COMMAND_NAME_LEN, HEADER_LEN, MAGIC, MAX_SPEECH_SIZE};
pub use varint::{read_var_int, read_var_str, var_int_len, write_var_int, write_var_str};
