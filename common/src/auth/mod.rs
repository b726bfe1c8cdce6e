// common/src/auth/mod.rs
pub mod challenge;
pub mod ethereum;
pub mod jwt;
pub mod names;
pub mod ucan;
pub mod web3;

pub use challenge::{Challenge, ChallengeStore};
pub use ethereum::EthereumSigner;
pub use jwt::{JwtManager, Token, TokenKind};
pub use names::NameGenerator;
pub use ucan::{UcanContext, UcanVerifier};
pub use web3::{Authenticated, BearerCredential, Web3Authenticator};
