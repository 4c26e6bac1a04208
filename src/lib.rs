//! Palisade - authorization policy decision service
//!
//! This library provides the policy decision point (PDP) and policy
//! administration surface for the control plane. It exposes all modules for
//! testing purposes.

pub mod authz;
pub mod settings;
pub mod web;
