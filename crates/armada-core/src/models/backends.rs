// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend types.

use serde::{Deserialize, Serialize};

/// A cloud provider (or provider-like) backend type.
///
/// [`BackendType::Aggregator`] is the meta-backend: it fans out to other
/// providers and may return offers of other backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Amazon Web Services.
    Aws,
    /// Microsoft Azure.
    Azure,
    /// Cudo Compute.
    Cudo,
    /// DataCrunch.
    DataCrunch,
    /// Google Cloud Platform.
    Gcp,
    /// Lambda Cloud.
    Lambda,
    /// TensorDock.
    TensorDock,
    /// Vast.ai marketplace (runner-only offers).
    Vastai,
    /// Kubernetes clusters (runner-only offers).
    Kubernetes,
    /// User-managed remote machines added to a pool over SSH.
    Remote,
    /// The aggregator meta-backend.
    Aggregator,
}

/// Backends that support explicit instance creation.
///
/// Offers from any other backend are dropped from create-instance paths.
pub const BACKENDS_WITH_CREATE_INSTANCE_SUPPORT: &[BackendType] = &[
    BackendType::Aws,
    BackendType::Azure,
    BackendType::Cudo,
    BackendType::DataCrunch,
    BackendType::Gcp,
    BackendType::Lambda,
    BackendType::TensorDock,
];

impl BackendType {
    /// The string form used in storage and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Cudo => "cudo",
            Self::DataCrunch => "datacrunch",
            Self::Gcp => "gcp",
            Self::Lambda => "lambda",
            Self::TensorDock => "tensordock",
            Self::Vastai => "vastai",
            Self::Kubernetes => "kubernetes",
            Self::Remote => "remote",
            Self::Aggregator => "aggregator",
        }
    }

    /// Parse a backend type from its string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aws" => Some(Self::Aws),
            "azure" => Some(Self::Azure),
            "cudo" => Some(Self::Cudo),
            "datacrunch" => Some(Self::DataCrunch),
            "gcp" => Some(Self::Gcp),
            "lambda" => Some(Self::Lambda),
            "tensordock" => Some(Self::TensorDock),
            "vastai" => Some(Self::Vastai),
            "kubernetes" => Some(Self::Kubernetes),
            "remote" => Some(Self::Remote),
            "aggregator" => Some(Self::Aggregator),
            _ => None,
        }
    }

    /// Whether this backend supports explicit instance creation.
    pub fn supports_create_instance(&self) -> bool {
        BACKENDS_WITH_CREATE_INSTANCE_SUPPORT.contains(self)
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
