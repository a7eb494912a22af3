//! Names of every key the query engine reads.

/// Namespace holding global sample metadata.
pub const METADATA: &str = "metadata";

/// Namespace holding store-wide state such as the context registry.
pub const STATE: &str = "state";

pub fn key(namespace: &str, suffix: &str) -> String {
    format!("{namespace}:{suffix}")
}

/// Hash of context name to description.
pub fn contexts() -> String {
    key(STATE, "contexts")
}

pub fn observation_index(context: &str) -> String {
    key(context, "__observation_index")
}

/// Prefix under which per-sample payloads live: `<ctx>:data:<sample>`.
pub const DATA_PREFIX: &str = "data";

pub fn sample_data(context: &str, sample: &str) -> String {
    key(context, &format!("{DATA_PREFIX}:{sample}"))
}

/// Hash of bare sample id to the JSON list of tags it is stored under.
pub fn sample_tags(context: &str) -> String {
    key(context, "sample-tags")
}

pub fn context_tags(context: &str) -> String {
    key(context, "tags")
}

pub fn observation_samples(context: &str, observation: &str) -> String {
    key(context, &format!("samples:{observation}"))
}

/// Prefix under which per-sample category sets live: `metadata:categories:<sample>`.
pub const CATEGORIES_PREFIX: &str = "categories";

pub fn sample_categories(sample: &str) -> String {
    key(METADATA, &format!("{CATEGORIES_PREFIX}:{sample}"))
}

/// Hash of sample id to value for one category.
pub fn category_values(category: &str) -> String {
    key(METADATA, &format!("category:{category}"))
}

pub fn categories_represented() -> String {
    key(METADATA, "categories-represented")
}

pub fn samples_represented() -> String {
    key(METADATA, "samples-represented")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(observation_index("C"), "C:__observation_index");
        assert_eq!(sample_data("C", "run1_S1"), "C:data:run1_S1");
        assert_eq!(sample_categories("S1"), "metadata:categories:S1");
        assert_eq!(category_values("ph"), "metadata:category:ph");
        assert_eq!(contexts(), "state:contexts");
    }
}
