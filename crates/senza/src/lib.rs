//! # senza - definition compiler and stack resolver
//!
//! Compiles declarative application definitions into deployable cloud
//! templates and addresses the stacks created from them.
//!
//! ## Introduction for developers
//!
//! Read this to understand how `senza` works internally.
//!
//! ### Definition terms
//!
//! Quick introduction to terms used to describe a definition document.
//!
//! In definition terms...
//! - a `definition` is one YAML mapping describing a deployable application
//! - its `SenzaInfo` block carries the stack name, an ordered parameter
//!   list and free-form metadata
//! - its `SenzaComponents` list declares named, typed `components`; the
//!   declaration order is the dependency order
//! - every other top-level key is a `passthrough` section that lands in the
//!   output template verbatim
//!
//! This is a valid definition:
//! ```yaml
//! SenzaInfo:
//!   StackName: hello-world
//!   Parameters:
//!     - ImageVersion:
//!         Description: Docker image version
//! SenzaComponents:
//!   - Configuration:
//!       Type: Senza::SubnetAutoConfiguration
//!   - AppServer:
//!       Type: Senza::AutoScalingGroup
//!       InstanceType: t2.micro
//!       Image: LatestImage
//! ```
//!
//! ### Loading definitions
//!
//! A document is parsed into a [definition::Definition]: the `SenzaInfo`
//! block is split into stack name, parameter declarations and remaining
//! metadata, components are split off with their `Type`, and everything
//! else is kept as passthrough. Structural errors (duplicate names,
//! non-trailing parameter defaults, missing types) are rejected here, before
//! any external call is made.
//!
//! ### Compiling
//!
//! see [compile::compile]
//!
//! Compilation resolves command-line parameters ([params]), evaluates
//! `{{...}}` template expressions ([templating]), resolves cross-stack
//! references ([cross_stack]) and expands each component into a template
//! fragment ([components]). Fragments and passthrough sections are merged
//! with logical-id ownership tracking, so a duplicated identifier fails the
//! compilation instead of silently overwriting a resource.
//!
//! ### Talking to the cloud
//!
//! All external access goes through the [cloud::ControlPlane] and
//! [cloud::MetadataSource] traits. The library ships static in-memory
//! implementations for tests and offline compilation; binaries plug in real
//! clients.
//!
//! ### Addressing deployed stacks
//!
//! [stacks] resolves stack references (name plus optional version, plain or
//! regular-expression) against the control plane inventory, and [traffic]
//! shifts weighted DNS traffic between the versions of an application.

pub mod cloud;
pub mod compile;
pub mod components;
pub mod cross_stack;
pub mod definition;
pub mod error;
pub mod params;
pub mod stacks;
pub mod templating;
pub mod traffic;
pub mod value;
