use std::collections::{BTreeMap, BTreeSet};

use crate::batch::DEFAULT_BATCH_SIZE;
use crate::category::{self, RecordFilter};
use crate::config::ResolvedConfig;
use crate::error::QueryError;
use crate::metadata::{self, MetadataQuery, MetadataTable, SampleMetadata};
use crate::resolve::{self, Resolution};
use crate::store::{KvStore, WebdisStore};
use crate::table::{self, Assembly};

/// Entry point bundling a store handle with the batch size used for every
/// batched read. Construct once and reuse across calls.
#[derive(Clone)]
pub struct App<S: KvStore> {
    store: S,
    batch_size: usize,
}

impl App<WebdisStore> {
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, QueryError> {
        let store = WebdisStore::new(&config.hostname, config.timeout)?;
        Self::with_batch_size(store, config.batch_size)
    }
}

impl<S: KvStore> App<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(store: S, batch_size: usize) -> Result<Self, QueryError> {
        if batch_size == 0 {
            return Err(QueryError::InvalidBatchSize(batch_size));
        }
        Ok(Self { store, batch_size })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn contexts(&self) -> Result<BTreeMap<String, String>, QueryError> {
        resolve::contexts(&self.store)
    }

    pub fn known_tags(&self, context: &str) -> Result<Vec<String>, QueryError> {
        resolve::known_tags(&self.store, context)
    }

    pub fn resolve<I, T>(&self, context: &str, samples: I) -> Result<Resolution, QueryError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        resolve::validate_context(&self.store, context)?;
        resolve::resolve_ambiguities(&self.store, context, samples, self.batch_size)
    }

    pub fn data_from_samples<I, T>(
        &self,
        context: &str,
        samples: I,
        require_present: bool,
    ) -> Result<Assembly, QueryError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        table::data_from_samples(
            &self.store,
            context,
            samples,
            require_present,
            self.batch_size,
        )
    }

    pub fn data_from_observations<I, T>(
        &self,
        context: &str,
        observations: I,
        exact: bool,
    ) -> Result<Assembly, QueryError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        table::data_from_observations(&self.store, context, observations, exact, self.batch_size)
    }

    pub fn samples_from_observations<I, T>(
        &self,
        context: &str,
        observations: I,
        exact: bool,
    ) -> Result<Vec<String>, QueryError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        table::samples_from_observations(&self.store, context, observations, exact)
    }

    pub fn sample_metadata<I, T>(
        &self,
        samples: I,
        query: &MetadataQuery,
    ) -> Result<SampleMetadata, QueryError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        metadata::sample_metadata(&self.store, samples, query, self.batch_size)
    }

    pub fn sample_counts_per_category(&self) -> Result<BTreeMap<String, u64>, QueryError> {
        category::sample_counts_per_category(&self.store)
    }

    pub fn category_sample_values(
        &self,
        category: &str,
        samples: Option<&[String]>,
    ) -> Result<Vec<(String, Option<String>)>, QueryError> {
        category::category_sample_values(&self.store, category, samples, self.batch_size)
    }

    pub fn search_table(
        &self,
        tag: Option<&str>,
        restrict_to: Option<&[String]>,
    ) -> Result<MetadataTable, QueryError> {
        category::search_table(&self.store, tag, restrict_to, self.batch_size)
    }

    pub fn metadata_search(
        &self,
        filter: &dyn RecordFilter,
        tag: Option<&str>,
        restrict_to: Option<&[String]>,
    ) -> Result<BTreeSet<String>, QueryError> {
        category::metadata_search(&self.store, filter, tag, restrict_to, self.batch_size)
    }
}
