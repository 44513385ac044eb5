use cryptolock_core::types::Address;
use rand::RngCore;

/// Fresh random address from the thread RNG.
pub fn random_address() -> Address {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    Address(bytes)
}
