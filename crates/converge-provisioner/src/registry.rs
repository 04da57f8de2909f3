use std::collections::BTreeMap;

use crate::error::ProvisionerError;
use crate::provider::Providers;
use crate::resource::Resource;
use crate::resources::{
    address::{self, Address},
    backend_service::{self, BackendService},
    bucket::{self, Bucket},
    forwarding_rule::{self, ForwardingRule},
    https_proxy::{self, HttpsProxy},
    scheduler_job::{self, SchedulerJob},
    serverless_neg::{self, ServerlessNeg},
    service::{self, Service},
    sql_database::{self, SqlDatabase},
    sql_instance::{self, SqlInstance},
    sql_user::{self, SqlUser},
    ssl_certificate::{self, SslCertificate},
    url_map::{self, UrlMap},
};

/// Builds an empty resource of one kind, wired to its provider API.
pub type Constructor = fn(&str, &Providers) -> Box<dyn Resource>;

/// Type tag to constructor.
///
/// Everything that needs to turn a kind string into a resource goes
/// through here, so a new kind only has to be registered once.
#[derive(Clone)]
pub struct Registry {
    constructors: BTreeMap<&'static str, Constructor>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Every built-in kind.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(bucket::KIND, |name, p| Box::new(Bucket::new(name, p.buckets.clone())));
        registry.register(service::KIND, |name, p| Box::new(Service::new(name, p.services.clone())));
        registry.register(sql_instance::KIND, |name, p| {
            Box::new(SqlInstance::new(name, p.sql_instances.clone()))
        });
        registry.register(sql_database::KIND, |name, p| {
            Box::new(SqlDatabase::new(name, p.sql_databases.clone()))
        });
        registry.register(sql_user::KIND, |name, p| Box::new(SqlUser::new(name, p.sql_users.clone())));
        registry.register(serverless_neg::KIND, |name, p| {
            Box::new(ServerlessNeg::new(name, p.serverless_negs.clone()))
        });
        registry.register(backend_service::KIND, |name, p| {
            Box::new(BackendService::new(name, p.backend_services.clone()))
        });
        registry.register(url_map::KIND, |name, p| Box::new(UrlMap::new(name, p.url_maps.clone())));
        registry.register(ssl_certificate::KIND, |name, p| {
            Box::new(SslCertificate::new(name, p.ssl_certificates.clone()))
        });
        registry.register(https_proxy::KIND, |name, p| {
            Box::new(HttpsProxy::new(name, p.https_proxies.clone()))
        });
        registry.register(address::KIND, |name, p| Box::new(Address::new(name, p.addresses.clone())));
        registry.register(forwarding_rule::KIND, |name, p| {
            Box::new(ForwardingRule::new(name, p.forwarding_rules.clone()))
        });
        registry.register(scheduler_job::KIND, |name, p| {
            Box::new(SchedulerJob::new(name, p.scheduler_jobs.clone()))
        });
        registry
    }

    /// Add or replace the constructor for `kind`.
    pub fn register(&mut self, kind: &'static str, constructor: Constructor) {
        self.constructors.insert(kind, constructor);
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }

    pub fn construct(
        &self,
        kind: &str,
        name: &str,
        providers: &Providers,
    ) -> Result<Box<dyn Resource>, ProvisionerError> {
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| ProvisionerError::UnknownKind(kind.to_string()))?;
        Ok(constructor(name, providers))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}
