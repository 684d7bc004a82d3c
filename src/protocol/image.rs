//! Image validation and encoding.

use super::Bit3Encoder;
use crate::loader::InputError;

/// The Propeller's hub RAM size, and therefore the largest image the booter
/// program will accept.
pub const MAX_IMAGE_SIZE: usize = 32_768;

/// The size of a [`MAX_IMAGE_SIZE`] image of zeroes after 3BP encoding --
/// the worst case, since long pulses pack less densely than short ones.
pub(crate) const MAX_ENCODED_IMAGE_SIZE: usize = 87_382;

/// Verifies that `image` is valid and encodes it for transmission.
///
/// Returns the encoded bytes and the number of longs encoded. If the image
/// size is not a multiple of four it is implicitly padded at the end with
/// NUL bytes, and the padded long is included in the count.
///
/// The encoded buffer is pre-reserved at [`MAX_ENCODED_IMAGE_SIZE`] so a
/// full-size image encodes without reallocation.
// TODO: verify the image checksum before sending (the booter's one-byte rule,
// accounting for the automatic stack bottom longs). Currently any image
// within the size bounds is sent and checksum failures surface from the
// Propeller itself in stage 5.
pub fn verify_and_encode(image: &[u8]) -> Result<(Vec<u8>, usize), InputError> {
    if image.is_empty() {
        return Err(InputError::InvalidImage(
            "image is too small to be valid".into(),
        ));
    }
    if image.len() > MAX_IMAGE_SIZE {
        return Err(InputError::InvalidImage(format!(
            "image size ({}) exceeds the Propeller's hub RAM size ({})",
            image.len(),
            MAX_IMAGE_SIZE
        )));
    }

    let mut encoded = Vec::with_capacity(MAX_ENCODED_IMAGE_SIZE);
    let num_longs = Bit3Encoder::new(&mut encoded).encode_bytes_as_longs(image);
    Ok((encoded, num_longs))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_image() {
        assert!(matches!(
            verify_and_encode(&[]),
            Err(InputError::InvalidImage(_))
        ));
    }

    #[test]
    fn rejects_oversized_image() {
        let image = vec![0u8; MAX_IMAGE_SIZE + 1];
        assert!(matches!(
            verify_and_encode(&image),
            Err(InputError::InvalidImage(_))
        ));
    }

    #[test]
    fn accepts_full_size_image() {
        let image = vec![0u8; MAX_IMAGE_SIZE];
        let (encoded, num_longs) = verify_and_encode(&image).unwrap();
        assert_eq!(num_longs, MAX_IMAGE_SIZE / 4);
        assert_eq!(encoded.len(), MAX_ENCODED_IMAGE_SIZE);
    }

    #[test]
    fn pads_tail_to_a_long() {
        let (_, num_longs) = verify_and_encode(&[0xAA]).unwrap();
        assert_eq!(num_longs, 1);
        let (_, num_longs) = verify_and_encode(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(num_longs, 2);
    }
}
