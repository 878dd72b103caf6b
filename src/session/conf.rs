//! Session descriptor builder
//!
//! The storage engine is configured with a single `key=value&key=value...`
//! string. The field set and its order are fixed; only the values come
//! from the benchmark parameters.

use std::fmt;
use std::fmt::Write as _;

use crate::config::BenchmarkParameters;
use crate::constants::{BLOCK_PADDING, CONF_BUFFER_CAPACITY, LG_PARTS, TAIL_PADDING};
use crate::error::{BenchError, BenchResult};

/// Field names in the order they are rendered
pub const CONF_FIELDS: [&str; 12] = [
    "rank",
    "tail_padding",
    "block_padding",
    "data_buffer",
    "min_data_buffer",
    "index_buffer",
    "min_index_buffer",
    "key_size",
    "value_size",
    "bf_bits_per_key",
    "epoch_log_rotation",
    "lg_parts",
];

/// Rendered session descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    descriptor: String,
}

impl SessionConfig {
    /// Build the descriptor for `params` within the standard capacity
    pub fn build(params: &BenchmarkParameters) -> BenchResult<Self> {
        Self::build_with_capacity(params, CONF_BUFFER_CAPACITY)
    }

    /// Build the descriptor, failing if it does not fit in `capacity` bytes
    ///
    /// One byte of the capacity is reserved for the NUL terminator of the
    /// engine ABI.
    pub fn build_with_capacity(params: &BenchmarkParameters, capacity: usize) -> BenchResult<Self> {
        let values: [u64; 12] = [
            u64::from(params.rank),
            u64::from(TAIL_PADDING),
            u64::from(BLOCK_PADDING),
            u64::from(params.io_size),
            u64::from(params.io_size),
            u64::from(params.io_size),
            u64::from(params.io_size),
            u64::from(params.key_size),
            u64::from(params.value_size),
            u64::from(params.filter_bits),
            u64::from(params.log_rotation),
            u64::from(LG_PARTS),
        ];

        let mut descriptor = String::with_capacity(capacity);
        for (i, (name, value)) in CONF_FIELDS.iter().zip(values).enumerate() {
            if i > 0 {
                descriptor.push('&');
            }
            // Writing into a String cannot fail
            let _ = write!(descriptor, "{}={}", name, value);
        }

        if descriptor.len() + 1 > capacity {
            return Err(BenchError::ConfigOverflow {
                len: descriptor.len(),
                capacity,
            });
        }

        tracing::debug!("{}", descriptor);

        Ok(Self { descriptor })
    }

    pub fn as_str(&self) -> &str {
        &self.descriptor
    }

    /// Iterate over the `(key, value)` pairs in rendered order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.descriptor
            .split('&')
            .filter_map(|kv| kv.split_once('='))
    }
}

impl fmt::Display for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reference_descriptor() {
        let params = BenchmarkParameters::default().with_rank(3, 4);
        let conf = SessionConfig::build(&params).unwrap();

        assert_eq!(
            conf.as_str(),
            "rank=3&tail_padding=1&block_padding=1\
             &data_buffer=2097152&min_data_buffer=2097152\
             &index_buffer=2097152&min_index_buffer=2097152\
             &key_size=8&value_size=32&bf_bits_per_key=10\
             &epoch_log_rotation=0&lg_parts=0"
        );
    }

    #[test]
    fn test_log_rotation_flag() {
        let mut params = BenchmarkParameters::default();
        params.log_rotation = true;
        let conf = SessionConfig::build(&params).unwrap();

        let rotation = conf
            .fields()
            .find(|(k, _)| *k == "epoch_log_rotation")
            .map(|(_, v)| v);
        assert_eq!(rotation, Some("1"));
    }

    #[test]
    fn test_large_io_size_fits() {
        let mut params = BenchmarkParameters::default();
        params.io_size = u32::MAX;
        params.value_size = u32::MAX;
        params.filter_bits = u32::MAX;

        let conf = SessionConfig::build(&params).unwrap();
        assert!(conf.as_str().contains("data_buffer=4294967295"));
        assert!(conf.as_str().len() < CONF_BUFFER_CAPACITY);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let params = BenchmarkParameters::default();
        let full = SessionConfig::build(&params).unwrap();

        // Exactly enough room for the descriptor and its terminator
        assert!(SessionConfig::build_with_capacity(&params, full.as_str().len() + 1).is_ok());

        let result = SessionConfig::build_with_capacity(&params, full.as_str().len());
        assert!(matches!(
            result,
            Err(BenchError::ConfigOverflow { len, capacity }) if len == full.as_str().len() && capacity == len
        ));
    }

    fn arb_params() -> impl Strategy<Value = BenchmarkParameters> {
        (
            0u32..4096,
            1u32..=u32::MAX,
            1u32..=u32::MAX,
            any::<u32>(),
            any::<u32>(),
            any::<bool>(),
        )
            .prop_map(|(rank, io_size, key_size, value_size, filter_bits, log_rotation)| {
                let mut params = BenchmarkParameters::default().with_rank(rank, rank + 1);
                params.io_size = io_size;
                params.key_size = key_size;
                params.value_size = value_size;
                params.filter_bits = filter_bits;
                params.log_rotation = log_rotation;
                params
            })
    }

    proptest! {
        #[test]
        fn prop_fields_in_fixed_order(params in arb_params()) {
            let conf = SessionConfig::build(&params).unwrap();
            let keys: Vec<&str> = conf.fields().map(|(k, _)| k).collect();
            prop_assert_eq!(keys, CONF_FIELDS.to_vec());

            let rank = params.rank.to_string();
            let (first_key, first_value) = conf.fields().next().unwrap();
            prop_assert_eq!(first_key, "rank");
            prop_assert_eq!(first_value, rank.as_str());
        }

        #[test]
        fn prop_never_truncates(params in arb_params(), capacity in 0usize..400) {
            let full = SessionConfig::build(&params).unwrap();
            match SessionConfig::build_with_capacity(&params, capacity) {
                Ok(conf) => prop_assert_eq!(conf, full),
                Err(BenchError::ConfigOverflow { len, .. }) => {
                    prop_assert_eq!(len, full.as_str().len());
                    prop_assert!(len + 1 > capacity);
                }
                Err(e) => prop_assert!(false, "unexpected error: {}", e),
            }
        }
    }
}
