//! kbundle CLI - package Kubernetes manifests with the images they use.

pub mod commands;
pub mod output;
