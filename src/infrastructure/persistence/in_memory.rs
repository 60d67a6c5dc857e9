//! 进程内存储实现
//!
//! 默认运行态与测试共用；真实部署可替换为数据库实现，端口不变。

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use tracing::debug;

use crate::domain::model::{
    Criteria, Installation, PushApplication, PushMessageInformation, Variant, VariantErrorStatus,
};
use crate::domain::repository::{InstallationRepository, MetricsStore, SortOrder, TokenPage};
use crate::error::{PushServerError, Result};

pub struct InMemoryMetricsStore {
    infos: RwLock<HashMap<String, PushMessageInformation>>,
    variant_errors: RwLock<HashMap<String, VariantErrorStatus>>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self {
            infos: RwLock::new(HashMap::new()),
            variant_errors: RwLock::new(HashMap::new()),
        }
    }

    pub fn variant_error(&self, push_job_id: &str, variant_id: &str) -> Option<VariantErrorStatus> {
        self.variant_errors
            .read()
            .ok()?
            .get(&format!("{}:{}", push_job_id, variant_id))
            .cloned()
    }
}

impl Default for InMemoryMetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_poisoned() -> PushServerError {
    PushServerError::StoreTransient("store lock poisoned".to_string())
}

impl MetricsStore for InMemoryMetricsStore {
    fn create_push_message_information(&self, info: &PushMessageInformation) -> Result<()> {
        self.infos
            .write()
            .map_err(|_| lock_poisoned())?
            .insert(info.id.clone(), info.clone());
        Ok(())
    }

    fn find_push_message_information(&self, id: &str) -> Result<Option<PushMessageInformation>> {
        Ok(self
            .infos
            .read()
            .map_err(|_| lock_poisoned())?
            .get(id)
            .cloned())
    }

    fn update_push_message_information(&self, info: &PushMessageInformation) -> Result<()> {
        self.infos
            .write()
            .map_err(|_| lock_poisoned())?
            .insert(info.id.clone(), info.clone());
        Ok(())
    }

    fn find_all_for_application(
        &self,
        app_id: &str,
        search: Option<&str>,
        sorting: SortOrder,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<PushMessageInformation>, usize)> {
        let infos = self.infos.read().map_err(|_| lock_poisoned())?;
        let mut matching: Vec<PushMessageInformation> = infos
            .values()
            .filter(|info| info.push_application_id == app_id)
            .filter(|info| match search {
                Some(term) => {
                    info.raw_json_message.contains(term) || info.id.contains(term)
                }
                None => true,
            })
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            let ordering = a.submit_date.cmp(&b.submit_date).then(a.id.cmp(&b.id));
            match sorting {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(page.saturating_mul(per_page))
            .take(per_page)
            .collect();
        Ok((items, total))
    }

    fn record_variant_error(&self, status: &VariantErrorStatus) -> Result<()> {
        let mut errors = self.variant_errors.write().map_err(|_| lock_poisoned())?;
        // 首个原因保留
        errors
            .entry(status.key())
            .or_insert_with(|| status.clone());
        Ok(())
    }
}

pub struct InMemoryInstallationStore {
    applications: RwLock<HashMap<String, PushApplication>>,
    // 每个变体下按令牌升序存储，分页游标即上一页最后一个令牌
    installations: RwLock<HashMap<String, BTreeMap<String, Installation>>>,
}

impl InMemoryInstallationStore {
    pub fn new() -> Self {
        Self {
            applications: RwLock::new(HashMap::new()),
            installations: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_application(&self, application: PushApplication) {
        if let Ok(mut applications) = self.applications.write() {
            applications.insert(application.id.clone(), application);
        }
    }

    pub fn add_installation(&self, installation: Installation) {
        if let Ok(mut installations) = self.installations.write() {
            installations
                .entry(installation.variant_id.clone())
                .or_default()
                .insert(installation.device_token.clone(), installation);
        }
    }

    pub fn token_count(&self, variant_id: &str) -> usize {
        self.installations
            .read()
            .ok()
            .and_then(|map| map.get(variant_id).map(|tokens| tokens.len()))
            .unwrap_or(0)
    }
}

impl Default for InMemoryInstallationStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_criteria(installation: &Installation, criteria: &Criteria) -> bool {
    if !installation.enabled {
        return false;
    }
    if let Some(categories) = &criteria.categories {
        if !installation
            .categories
            .iter()
            .any(|category| categories.contains(category))
        {
            return false;
        }
    }
    if let Some(aliases) = &criteria.aliases {
        match &installation.alias {
            Some(alias) if aliases.contains(alias) => {}
            _ => return false,
        }
    }
    if let Some(device_types) = &criteria.device_types {
        match &installation.device_type {
            Some(device_type) if device_types.contains(device_type) => {}
            _ => return false,
        }
    }
    true
}

impl InstallationRepository for InMemoryInstallationStore {
    fn find_application(&self, app_id: &str) -> Result<Option<PushApplication>> {
        Ok(self
            .applications
            .read()
            .map_err(|_| lock_poisoned())?
            .get(app_id)
            .cloned())
    }

    fn find_variant(&self, variant_id: &str) -> Result<Option<Variant>> {
        let applications = self.applications.read().map_err(|_| lock_poisoned())?;
        Ok(applications
            .values()
            .flat_map(|application| application.variants.iter())
            .find(|variant| variant.id == variant_id)
            .cloned())
    }

    fn find_device_tokens(
        &self,
        variant_id: &str,
        criteria: &Criteria,
        last_token: Option<&str>,
        limit: usize,
    ) -> Result<TokenPage> {
        let installations = self.installations.read().map_err(|_| lock_poisoned())?;
        let Some(tokens) = installations.get(variant_id) else {
            return Ok(TokenPage {
                tokens: Vec::new(),
                next_cursor: None,
                is_last: true,
            });
        };

        // 多取一个判断是否还有下一页
        let mut window: Vec<String> = tokens
            .iter()
            .filter(|(token, _)| match last_token {
                Some(cursor) => token.as_str() > cursor,
                None => true,
            })
            .filter(|(_, installation)| matches_criteria(installation, criteria))
            .map(|(token, _)| token.clone())
            .take(limit + 1)
            .collect();

        let is_last = window.len() <= limit;
        window.truncate(limit);
        let next_cursor = window.last().cloned();
        Ok(TokenPage {
            tokens: window,
            next_cursor,
            is_last,
        })
    }

    fn remove_installations_for_variant_by_device_tokens(
        &self,
        variant_id: &str,
        tokens: &[String],
    ) -> Result<()> {
        let mut installations = self.installations.write().map_err(|_| lock_poisoned())?;
        if let Some(variant_tokens) = installations.get_mut(variant_id) {
            for token in tokens {
                if variant_tokens.remove(token).is_some() {
                    debug!(variant_id, token = %token, "removed invalid device token");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::VariantType;

    fn seeded_store() -> InMemoryInstallationStore {
        let store = InMemoryInstallationStore::new();
        store.add_application(PushApplication {
            id: "app-1".to_string(),
            name: "Demo".to_string(),
            variants: vec![Variant {
                id: "variant-1".to_string(),
                name: "android".to_string(),
                variant_type: VariantType::Android,
                production: false,
                credentials: HashMap::new(),
            }],
        });
        for token in ["token-a", "token-b", "token-c", "token-d", "token-e"] {
            store.add_installation(Installation::new("variant-1", token));
        }
        store
    }

    #[test]
    fn test_token_pagination_is_deterministic() {
        let store = seeded_store();
        let criteria = Criteria::default();

        let first = store
            .find_device_tokens("variant-1", &criteria, None, 2)
            .unwrap();
        assert_eq!(first.tokens, vec!["token-a", "token-b"]);
        assert!(!first.is_last);

        let second = store
            .find_device_tokens("variant-1", &criteria, first.next_cursor.as_deref(), 2)
            .unwrap();
        assert_eq!(second.tokens, vec!["token-c", "token-d"]);
        assert!(!second.is_last);

        let third = store
            .find_device_tokens("variant-1", &criteria, second.next_cursor.as_deref(), 2)
            .unwrap();
        assert_eq!(third.tokens, vec!["token-e"]);
        assert!(third.is_last);
    }

    #[test]
    fn test_empty_variant_returns_last_page_immediately() {
        let store = InMemoryInstallationStore::new();
        let page = store
            .find_device_tokens("missing", &Criteria::default(), None, 10)
            .unwrap();
        assert!(page.tokens.is_empty());
        assert!(page.is_last);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_exact_page_boundary_is_last() {
        let store = seeded_store();
        let page = store
            .find_device_tokens("variant-1", &Criteria::default(), None, 5)
            .unwrap();
        assert_eq!(page.tokens.len(), 5);
        assert!(page.is_last);
    }

    #[test]
    fn test_criteria_filters_tokens() {
        let store = InMemoryInstallationStore::new();
        store.add_installation(
            Installation::new("variant-1", "token-1")
                .with_alias("alice")
                .with_categories(vec!["sports".to_string()]),
        );
        store.add_installation(
            Installation::new("variant-1", "token-2")
                .with_alias("bob")
                .with_device_type("tablet"),
        );

        let criteria = Criteria {
            aliases: Some(vec!["alice".to_string()]),
            ..Criteria::default()
        };
        let page = store
            .find_device_tokens("variant-1", &criteria, None, 10)
            .unwrap();
        assert_eq!(page.tokens, vec!["token-1"]);

        let criteria = Criteria {
            device_types: Some(vec!["tablet".to_string()]),
            ..Criteria::default()
        };
        let page = store
            .find_device_tokens("variant-1", &criteria, None, 10)
            .unwrap();
        assert_eq!(page.tokens, vec!["token-2"]);
    }

    #[test]
    fn test_token_removal() {
        let store = seeded_store();
        store
            .remove_installations_for_variant_by_device_tokens(
                "variant-1",
                &["token-b".to_string(), "token-d".to_string()],
            )
            .unwrap();
        assert_eq!(store.token_count("variant-1"), 3);
    }

    #[test]
    fn test_metrics_search_and_paging() {
        let store = InMemoryMetricsStore::new();
        for index in 0..4 {
            let mut info = PushMessageInformation::new(
                format!("job-{}", index),
                "app-1",
                format!("{{\"alert\":\"hello {}\"}}", index),
                1,
            );
            info.submit_date = chrono::Utc::now() + chrono::Duration::seconds(index);
            store.create_push_message_information(&info).unwrap();
        }

        let (items, total) = store
            .find_all_for_application("app-1", None, SortOrder::Ascending, 0, 3)
            .unwrap();
        assert_eq!(total, 4);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].id, "job-0");

        let (items, _) = store
            .find_all_for_application("app-1", None, SortOrder::Descending, 0, 3)
            .unwrap();
        assert_eq!(items[0].id, "job-3");

        let (items, total) = store
            .find_all_for_application("app-1", Some("hello 2"), SortOrder::Ascending, 0, 10)
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].id, "job-2");
    }

    #[test]
    fn test_variant_error_keeps_first_reason() {
        let store = InMemoryMetricsStore::new();
        store
            .record_variant_error(&VariantErrorStatus::new("job-1", "variant-1", "first"))
            .unwrap();
        store
            .record_variant_error(&VariantErrorStatus::new("job-1", "variant-1", "second"))
            .unwrap();
        let recorded = store.variant_error("job-1", "variant-1").unwrap();
        assert_eq!(recorded.error_reason, "first");
    }
}
