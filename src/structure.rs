//! sdio-dma-sdmmc - Useful macros for parsing SD card registers.
//!
//! The register images are kept as big-endian byte arrays, so byte 0 holds
//! the most significant bits of the register.

macro_rules! access_field {
    ($self:expr, $offset:expr, $start_bit:expr, 1) => {
        ($self.data()[$offset] & (1 << $start_bit)) != 0
    };
    ($self:expr, $offset:expr, $start:expr, $num_bits:expr) => {
        ($self.data()[$offset] >> $start) & (((1u16 << $num_bits) - 1) as u8)
    };
}

macro_rules! define_field {
    ($name:ident, bool, $offset:expr, $bit:expr) => {
        doc_comment::doc_comment! {
            concat!("Get the value of the ", stringify!($name), " flag"),
            pub fn $name(&self) -> bool {
                access_field!(self, $offset, $bit, 1)
            }
        }
    };
    ($name:ident, u8, $offset:expr, $start_bit:expr, $num_bits:expr) => {
        doc_comment::doc_comment! {
            concat!("Get the value of the ", stringify!($name), " field"),
            pub fn $name(&self) -> u8 {
                access_field!(self, $offset, $start_bit, $num_bits)
            }
        }
    };
    ($name:ident, $type:ty, [ $( ( $offset:expr, $start_bit:expr, $num_bits:expr ) ),+ ]) => {
        doc_comment::doc_comment! {
            concat!("Get the value of the ", stringify!($name), " field"),
            pub fn $name(&self) -> $type {
                let mut result = 0;
                $(
                        result <<= $num_bits;
                        let part = access_field!(self, $offset, $start_bit, $num_bits) as $type;
                        result |=  part;
                )+
                result
            }
        }
    };
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
