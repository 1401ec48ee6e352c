use crate::backend::DnsApi;
use crate::backend::types::{DnsRecordHandle, IngressRule, ReconcileMode};
use crate::errors::{self, Result, TunnelError};

/// The zone a hostname is looked up in: its last two labels.
///
/// `app.example.com` maps to `example.com`. Hostnames under multi-label
/// public suffixes map wrongly (`app.example.co.uk` gives `co.uk`), so their
/// zone lookup finds nothing and DNS handling is skipped for them.
pub fn registrable_domain(hostname: &str) -> String {
    let labels: Vec<&str> = hostname.trim_end_matches('.').split('.').collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }
    labels[labels.len() - 2..].join(".")
}

pub struct DnsReconciler<'a> {
    api: &'a dyn DnsApi,
}

impl<'a> DnsReconciler<'a> {
    pub fn new(api: &'a dyn DnsApi) -> Self {
        Self { api }
    }

    pub async fn lookup(&self, hostname: &str) -> Result<Option<DnsRecordHandle>> {
        let domain = registrable_domain(hostname);
        let Some(zone_id) = self.api.find_zone_id(&domain).await? else {
            tracing::warn!("{}", errors::dns::zone_not_found(&domain, hostname));
            return Ok(None);
        };

        let record_id = self.api.find_record_id(&zone_id, hostname).await?;
        Ok(record_id.map(|record_id| DnsRecordHandle {
            zone_id,
            record_id,
            hostname: hostname.to_string(),
        }))
    }

    pub async fn inspect(
        &self,
        rules: &[IngressRule],
        remove_existing: bool,
    ) -> Result<Vec<DnsRecordHandle>> {
        let mut stale = Vec::new();

        for rule in rules {
            let Some(record) = self.lookup(&rule.hostname).await? else {
                tracing::debug!("No existing DNS record for {}", rule.hostname);
                continue;
            };

            if !remove_existing {
                return Err(TunnelError::Conflict(errors::dns::already_exists(
                    &rule.hostname,
                )));
            }

            tracing::info!(
                "DNS record for {} already exists ({}), it will be replaced",
                rule.hostname,
                record.record_id
            );
            if !stale.contains(&record) {
                stale.push(record);
            }
        }

        Ok(stale)
    }

    pub async fn remove(&self, records: &[DnsRecordHandle]) -> Result<()> {
        for record in records {
            tracing::info!("Deleting DNS record for {}", record.hostname);
            self.api
                .delete_record(&record.zone_id, &record.record_id)
                .await?;
        }
        Ok(())
    }

    pub async fn teardown(&self, rules: &[IngressRule]) -> Vec<String> {
        let mode = ReconcileMode::Forced;
        let mut warnings = Vec::new();

        for rule in rules {
            let record = match self.lookup(&rule.hostname).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::debug!("{} teardown: no DNS record for {}", mode, rule.hostname);
                    continue;
                }
                Err(e) => {
                    let warning = errors::dns::lookup_failed(&rule.hostname, &e.to_string());
                    tracing::warn!("{}", warning);
                    warnings.push(warning);
                    continue;
                }
            };

            tracing::info!("Deleting DNS record for {}", record.hostname);
            if let Err(e) = self
                .api
                .delete_record(&record.zone_id, &record.record_id)
                .await
            {
                let warning = errors::dns::delete_failed(&rule.hostname, &e.to_string());
                tracing::warn!("{}", warning);
                warnings.push(warning);
            }
        }

        warnings
    }
}
