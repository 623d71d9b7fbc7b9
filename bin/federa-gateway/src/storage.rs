//! In-memory object index backing the storage listing endpoint

use federa_common::BucketName;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Query parameters for list objects
#[derive(Debug, Deserialize, Default)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<u32>,
}

impl ListObjectsParams {
    /// Widen a bare leading segment to the whole segment: `Engineering`
    /// lists `Engineering/`, never `EngineeringOps/`.
    pub fn scoped_to_segment(mut self) -> Self {
        if let Some(prefix) = &mut self.prefix
            && !prefix.is_empty()
            && !prefix.contains('/')
        {
            prefix.push('/');
        }
        self
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    pub name: String,
    pub prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    pub max_keys: u32,
    pub key_count: u32,
    pub is_truncated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub common_prefixes: Vec<String>,
    #[serde(default)]
    pub contents: Vec<String>,
}

/// Object keys per bucket
#[derive(Debug, Default)]
pub struct ObjectIndex {
    buckets: RwLock<BTreeMap<BucketName, BTreeSet<String>>>,
}

impl ObjectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_bucket(&self, bucket: BucketName) {
        self.buckets.write().entry(bucket).or_default();
    }

    pub fn put(&self, bucket: BucketName, key: impl Into<String>) {
        self.buckets.write().entry(bucket).or_default().insert(key.into());
    }

    pub fn has_bucket(&self, bucket: &BucketName) -> bool {
        self.buckets.read().contains_key(bucket)
    }

    /// List keys under `params.prefix`; `None` when the bucket does not exist
    pub fn list(&self, bucket: &BucketName, params: &ListObjectsParams) -> Option<ListBucketResult> {
        let buckets = self.buckets.read();
        let keys = buckets.get(bucket)?;

        let prefix = params.prefix.clone().unwrap_or_default();
        let max_keys = params.max_keys.unwrap_or(1000);

        let mut contents = Vec::new();
        let mut common_prefixes = BTreeSet::new();
        let mut is_truncated = false;

        for key in keys.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                break;
            };
            let common_prefix = params
                .delimiter
                .as_deref()
                .filter(|delim| !delim.is_empty())
                .and_then(|delim| {
                    rest.find(delim)
                        .map(|pos| format!("{prefix}{}", &rest[..pos + delim.len()]))
                });
            if let Some(common_prefix) = &common_prefix
                && common_prefixes.contains(common_prefix)
            {
                continue;
            }
            if contents.len() + common_prefixes.len() >= max_keys as usize {
                is_truncated = true;
                break;
            }
            match common_prefix {
                Some(common_prefix) => {
                    common_prefixes.insert(common_prefix);
                }
                None => contents.push(key.clone()),
            }
        }

        Some(ListBucketResult {
            name: bucket.to_string(),
            prefix,
            delimiter: params.delimiter.clone(),
            max_keys,
            key_count: (contents.len() + common_prefixes.len()) as u32,
            is_truncated,
            common_prefixes: common_prefixes.into_iter().collect(),
            contents,
        })
    }
}
