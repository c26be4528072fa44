use std::hash::Hasher;

/// A hasher optimized for hashing dense component type IDs.
///
/// Component type IDs are allocated sequentially from zero, so they are
/// already well distributed for use as hash-map keys.
#[derive(Default)]
pub struct ComponentTypeIdHasher(u64);

impl Hasher for ComponentTypeIdHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        self.0 = u64::from_ne_bytes(buf);
    }

    fn write_u32(&mut self, value: u32) {
        self.0 = value as u64;
    }
}

/// A hasher optimized for hashing types that are represented as a u64.
#[derive(Default)]
pub struct U64Hasher(u64);

impl Hasher for U64Hasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        use std::convert::TryInto;
        let seed = u64::from_ne_bytes(bytes.try_into().unwrap());
        let max_prime = 11_400_714_819_323_198_549u64;
        self.0 = max_prime.wrapping_mul(seed);
    }

    fn write_u64(&mut self, value: u64) {
        let max_prime = 11_400_714_819_323_198_549u64;
        self.0 = max_prime.wrapping_mul(value);
    }
}
