/// Hash primitives shared by the Merkle tree and the ledger codec.
pub mod hash;
