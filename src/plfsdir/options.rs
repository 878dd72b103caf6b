use std::io;

/// Engine options parsed from a session descriptor
///
/// Keys that are not present keep their defaults; unknown keys are ignored
/// so newer descriptors still open with an older engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirOptions {
    pub rank: u32,
    pub tail_padding: bool,
    pub block_padding: bool,
    pub data_buffer: usize,
    pub min_data_buffer: usize,
    pub index_buffer: usize,
    pub min_index_buffer: usize,
    pub key_size: usize,
    pub value_size: usize,
    pub bf_bits_per_key: usize,
    pub epoch_log_rotation: bool,
    pub lg_parts: u32,
}

impl Default for DirOptions {
    fn default() -> Self {
        Self {
            rank: 0,
            tail_padding: false,
            block_padding: false,
            data_buffer: 4 << 20,
            min_data_buffer: 4 << 20,
            index_buffer: 4 << 20,
            min_index_buffer: 4 << 20,
            key_size: 8,
            value_size: 32,
            bf_bits_per_key: 8,
            epoch_log_rotation: false,
            lg_parts: 0,
        }
    }
}

impl DirOptions {
    /// Parse a `key=value&key=value...` descriptor
    pub fn parse(conf: &str) -> io::Result<Self> {
        let mut options = Self::default();

        for kv in conf.split('&').filter(|kv| !kv.is_empty()) {
            let (key, value) = kv
                .split_once('=')
                .ok_or_else(|| invalid(format!("malformed option '{}'", kv)))?;

            match key {
                "rank" => options.rank = parse_num(key, value)?,
                "tail_padding" => options.tail_padding = parse_flag(key, value)?,
                "block_padding" => options.block_padding = parse_flag(key, value)?,
                "data_buffer" => options.data_buffer = parse_num(key, value)?,
                "min_data_buffer" => options.min_data_buffer = parse_num(key, value)?,
                "index_buffer" => options.index_buffer = parse_num(key, value)?,
                "min_index_buffer" => options.min_index_buffer = parse_num(key, value)?,
                "key_size" => options.key_size = parse_num(key, value)?,
                "value_size" => options.value_size = parse_num(key, value)?,
                "bf_bits_per_key" => options.bf_bits_per_key = parse_num(key, value)?,
                "epoch_log_rotation" => options.epoch_log_rotation = parse_flag(key, value)?,
                "lg_parts" => options.lg_parts = parse_num(key, value)?,
                _ => tracing::debug!("ignoring unknown plfsdir option {}", key),
            }
        }

        if options.data_buffer < options.min_data_buffer {
            return Err(invalid(format!(
                "data_buffer {} below min_data_buffer {}",
                options.data_buffer, options.min_data_buffer
            )));
        }

        if options.index_buffer < options.min_index_buffer {
            return Err(invalid(format!(
                "index_buffer {} below min_index_buffer {}",
                options.index_buffer, options.min_index_buffer
            )));
        }

        Ok(options)
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> io::Result<T> {
    value
        .parse()
        .map_err(|_| invalid(format!("bad value '{}' for {}", value, key)))
}

fn parse_flag(key: &str, value: &str) -> io::Result<bool> {
    match value {
        "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        _ => Err(invalid(format!("bad flag '{}' for {}", value, key))),
    }
}
