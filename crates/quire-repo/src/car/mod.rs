//! CAR (Content Addressable aRchive) file I/O
//!
//! A CAR file is a header listing root CIDs followed by `(CID, bytes)` blocks.
//! Repository exports are CAR files rooted at the head commit, and
//! [`FileBlockStore`](crate::storage::FileBlockStore) keeps its blocks in one.
//!
//! # Examples
//!
//! Reading a CAR file:
//! ```ignore
//! use quire_repo::car::read_car;
//!
//! let blocks = read_car("repo.car").await?;
//! ```
//!
//! Writing a CAR file:
//! ```ignore
//! use quire_repo::car::write_car;
//!
//! write_car("repo.car", vec![commit_cid], blocks).await?;
//! ```

pub mod reader;
pub mod writer;

pub use reader::{ParsedCar, parse_car_bytes, read_car, read_car_header};
pub use writer::{write_car, write_car_bytes};
