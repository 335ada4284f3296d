//! Recording sequences handed from the producer to the storage consumer
//!
//! A sequence is the ordered plan of what storage should write, for example:
//!
//! ```text
//! Start, 100, 101, 102 ... 354, End, Start, 300, 301 ... 405, End
//! ```
//!
//! Each entry is a 32-bit token: either the unwrapped index of a completed
//! buffer or one of two markers. The markers sit at the very top of the
//! index space, which at 384 kHz and 16K-sample buffers is months of
//! continuous sampling away.
//!
//! - `fifo` is the bounded single-producer/single-consumer queue of tokens
//! - `reader` is the consumer side that turns tokens into buffers to write

pub mod fifo;
pub mod reader;

/// One entry of the sequence FIFO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    /// A completed buffer, by unwrapped index
    Data(u32),
    /// Everything until the next `EndOfSequence` belongs to one output span
    StartOfSequence,
    /// Close the current output span
    EndOfSequence,
}

impl Token {
    /// Raw value of `EndOfSequence`
    pub const END_OF_SEQUENCE: u32 = u32::MAX;

    /// Raw value of `StartOfSequence`
    pub const START_OF_SEQUENCE: u32 = u32::MAX - 1;

    /// Largest unwrapped index a `Data` token can carry
    pub const MAX_INDEX: u32 = u32::MAX - 2;

    /// Encode into the 32-bit FIFO representation
    pub fn encode(self) -> u32 {
        match self {
            Token::Data(index) => {
                debug_assert!(index <= Self::MAX_INDEX, "buffer index collides with a marker");
                index
            }
            Token::StartOfSequence => Self::START_OF_SEQUENCE,
            Token::EndOfSequence => Self::END_OF_SEQUENCE,
        }
    }

    /// Decode a raw FIFO value
    pub fn decode(raw: u32) -> Self {
        match raw {
            Self::END_OF_SEQUENCE => Token::EndOfSequence,
            Self::START_OF_SEQUENCE => Token::StartOfSequence,
            index => Token::Data(index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_values() {
        assert_eq!(Token::EndOfSequence.encode(), 0xFFFF_FFFF);
        assert_eq!(Token::StartOfSequence.encode(), 0xFFFF_FFFE);
        assert_eq!(Token::decode(0xFFFF_FFFF), Token::EndOfSequence);
        assert_eq!(Token::decode(0xFFFF_FFFE), Token::StartOfSequence);
    }

    #[test]
    fn test_data_boundaries() {
        assert_eq!(Token::decode(0), Token::Data(0));
        assert_eq!(Token::decode(Token::MAX_INDEX), Token::Data(Token::MAX_INDEX));
        assert_eq!(Token::Data(1234).encode(), 1234);
    }
}
