pub mod rgb_conversion;
