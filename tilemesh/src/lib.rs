//! # TileMesh Library
//!
//! The `tilemesh` library estimates 2D geometric transformations from point
//! correspondences and refines them into elastic, piecewise-affine deformations.
//! It is built for registering image tiles and sections against each other: fit a
//! robust global model, relax a graph of many local models towards consistency, and
//! finally warp through a triangulated mesh.
//!
//! ## Overview of Modules
//!
//! - **`point`**: `Point` (a local and a world location) and `PointMatch` (a weighted
//!   correspondence between two points).
//!
//! - **`model`**: The `CoordinateTransform` family of traits and the `Model` trait with
//!   closed-form fitting, RANSAC and iterative trimmed-least-squares filtering.
//!
//! - **`translation_model`**, **`rigid_model`**, **`similarity_model`**, **`affine_model`**,
//!   **`homography_model`**: The concrete model families, from one to four minimal matches.
//!
//! - **`regularized_model`**: Blends a model with a simpler regularizer by a weight `λ`.
//!
//! - **`any_model`**: `ModelKind` and the `AnyModel` enum for choosing a family at runtime.
//!
//! - **`tile`**: A graph of tiles, each owning a model and matches into its neighbours.
//!
//! - **`tile_configuration`**: Fixed tiles, pre-alignment and the iterative (optionally
//!   parallel) relaxation of a tile graph.
//!
//! - **`error_statistic`**: Running error statistics and the plateau test every
//!   optimizer uses to decide convergence.
//!
//! - **`transform_mesh`**: The triangulated piecewise-affine mesh with forward and
//!   inverse mapping.
//!
//! - **`spring`**, **`vertex`**, **`spring_mesh`**: A damped mass-spring system laid over a
//!   transform mesh, for elastic refinement against anchored correspondences.
//!
//! - **`moving_least_squares`**: Distance-weighted local models, either evaluated
//!   per query or at mesh vertices, optionally coupled elastically.
//!
//! - **`transform_map`**: A dense per-pixel lookup table of a transformation and its
//!   binary file format.
//!
//! - **`error`**: `ModelError` and the crate `Result` alias.

pub mod error;
pub mod point;
pub mod error_statistic;

// Models
pub mod model;
pub mod translation_model;
pub mod rigid_model;
pub mod similarity_model;
pub mod affine_model;
pub mod homography_model;
pub mod regularized_model;
pub mod any_model;

// Tile graph
pub mod tile;
pub mod tile_configuration;

// Meshes
pub mod transform_mesh;
pub mod spring;
pub mod vertex;
pub mod spring_mesh;
pub mod moving_least_squares;

pub mod transform_map;

pub use error::{ModelError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
