//! Config retry dispatch.
//!
//! Operations that depend on the engine's active configuration can fail
//! because another process registered a newer default configuration. Those
//! operations are healed by reinitializing onto the current default and
//! retried exactly once.

use crate::environment::Environment;
use crate::CoreError;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationId {
    // engine
    AddRecord,
    DeleteRecord,
    ReevaluateRecord,
    GetRecord,
    GetEntityByRecordId,
    SearchByAttributes,
    WhyRecords,
    GetRecordPreview,
    PrimeEngine,
    GetStats,
    GetActiveConfigId,
    CountRedoRecords,
    // config
    CreateConfig,
    ImportConfig,
    ExportConfig,
    CloseConfig,
    AddDataSource,
    GetDataSources,
    // config manager
    RegisterConfig,
    GetConfig,
    GetConfigRegistry,
    GetDefaultConfigId,
    SetDefaultConfigId,
    ReplaceDefaultConfigId,
    // diagnostic
    GetRepositoryInfo,
    CheckRepositoryPerformance,
    GetFeature,
    PurgeRepository,
    // product
    GetVersion,
    GetLicense,
}

impl OperationId {
    pub const ALL: [OperationId; 30] = [
        OperationId::AddRecord,
        OperationId::DeleteRecord,
        OperationId::ReevaluateRecord,
        OperationId::GetRecord,
        OperationId::GetEntityByRecordId,
        OperationId::SearchByAttributes,
        OperationId::WhyRecords,
        OperationId::GetRecordPreview,
        OperationId::PrimeEngine,
        OperationId::GetStats,
        OperationId::GetActiveConfigId,
        OperationId::CountRedoRecords,
        OperationId::CreateConfig,
        OperationId::ImportConfig,
        OperationId::ExportConfig,
        OperationId::CloseConfig,
        OperationId::AddDataSource,
        OperationId::GetDataSources,
        OperationId::RegisterConfig,
        OperationId::GetConfig,
        OperationId::GetConfigRegistry,
        OperationId::GetDefaultConfigId,
        OperationId::SetDefaultConfigId,
        OperationId::ReplaceDefaultConfigId,
        OperationId::GetRepositoryInfo,
        OperationId::CheckRepositoryPerformance,
        OperationId::GetFeature,
        OperationId::PurgeRepository,
        OperationId::GetVersion,
        OperationId::GetLicense,
    ];

    /// Whether a failure of this operation is healed by reinitializing onto
    /// the current default configuration and retried.
    pub fn is_config_retryable(self) -> bool {
        match self {
            OperationId::AddRecord
            | OperationId::DeleteRecord
            | OperationId::ReevaluateRecord
            | OperationId::GetRecord
            | OperationId::GetEntityByRecordId
            | OperationId::SearchByAttributes
            | OperationId::WhyRecords => true,
            OperationId::GetRecordPreview
            | OperationId::PrimeEngine
            | OperationId::GetStats
            | OperationId::GetActiveConfigId
            | OperationId::CountRedoRecords
            | OperationId::CreateConfig
            | OperationId::ImportConfig
            | OperationId::ExportConfig
            | OperationId::CloseConfig
            | OperationId::AddDataSource
            | OperationId::GetDataSources
            | OperationId::RegisterConfig
            | OperationId::GetConfig
            | OperationId::GetConfigRegistry
            | OperationId::GetDefaultConfigId
            | OperationId::SetDefaultConfigId
            | OperationId::ReplaceDefaultConfigId
            | OperationId::GetRepositoryInfo
            | OperationId::CheckRepositoryPerformance
            | OperationId::GetFeature
            | OperationId::PurgeRepository
            | OperationId::GetVersion
            | OperationId::GetLicense => false,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OperationId::AddRecord => "add_record",
            OperationId::DeleteRecord => "delete_record",
            OperationId::ReevaluateRecord => "reevaluate_record",
            OperationId::GetRecord => "get_record",
            OperationId::GetEntityByRecordId => "get_entity_by_record_id",
            OperationId::SearchByAttributes => "search_by_attributes",
            OperationId::WhyRecords => "why_records",
            OperationId::GetRecordPreview => "get_record_preview",
            OperationId::PrimeEngine => "prime_engine",
            OperationId::GetStats => "get_stats",
            OperationId::GetActiveConfigId => "get_active_config_id",
            OperationId::CountRedoRecords => "count_redo_records",
            OperationId::CreateConfig => "create_config",
            OperationId::ImportConfig => "import_config",
            OperationId::ExportConfig => "export_config",
            OperationId::CloseConfig => "close_config",
            OperationId::AddDataSource => "add_data_source",
            OperationId::GetDataSources => "get_data_sources",
            OperationId::RegisterConfig => "register_config",
            OperationId::GetConfig => "get_config",
            OperationId::GetConfigRegistry => "get_config_registry",
            OperationId::GetDefaultConfigId => "get_default_config_id",
            OperationId::SetDefaultConfigId => "set_default_config_id",
            OperationId::ReplaceDefaultConfigId => "replace_default_config_id",
            OperationId::GetRepositoryInfo => "get_repository_info",
            OperationId::CheckRepositoryPerformance => "check_repository_performance",
            OperationId::GetFeature => "get_feature",
            OperationId::PurgeRepository => "purge_repository",
            OperationId::GetVersion => "get_version",
            OperationId::GetLicense => "get_license",
        }
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Run `call`, healing and retrying it once if `op` is config-retryable.
///
/// Healing reads the repository's default config id and reinitializes the
/// environment onto it. If healing itself fails, the original error is
/// returned and the healing failure is only logged.
pub fn invoke_with_retry<T>(
    env: &Environment,
    op: OperationId,
    mut call: impl FnMut() -> Result<T, CoreError>,
) -> Result<T, CoreError> {
    let err = match call() {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    if !op.is_config_retryable() || matches!(err, CoreError::NotActive) {
        return Err(err);
    }

    match heal(env) {
        Ok(config_id) => {
            info!("{op} failed ({err}), retrying on config {config_id}");
            call()
        }
        Err(recovery) => {
            warn!("{op} failed ({err}) and recovery failed: {recovery}");
            Err(err)
        }
    }
}

fn heal(env: &Environment) -> Result<i64, CoreError> {
    let config_id = env.config_manager()?.get_default_config_id()?;
    env.reinitialize(config_id)?;
    Ok(config_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn operation_table_is_complete() {
        let unique: HashSet<_> = OperationId::ALL.iter().collect();
        assert_eq!(unique.len(), OperationId::ALL.len());
        let names: HashSet<_> = OperationId::ALL.iter().map(|op| op.name()).collect();
        assert_eq!(names.len(), OperationId::ALL.len());
    }

    #[test]
    fn only_record_operations_are_retryable() {
        let retryable: Vec<_> = OperationId::ALL
            .iter()
            .filter(|op| op.is_config_retryable())
            .map(|op| op.to_string())
            .collect();
        assert_eq!(
            retryable,
            [
                "add_record",
                "delete_record",
                "reevaluate_record",
                "get_record",
                "get_entity_by_record_id",
                "search_by_attributes",
                "why_records",
            ]
        );
    }

    #[test]
    fn config_editing_is_not_retryable() {
        for op in [
            OperationId::CreateConfig,
            OperationId::AddDataSource,
            OperationId::RegisterConfig,
            OperationId::SetDefaultConfigId,
            OperationId::GetFeature,
            OperationId::GetVersion,
        ] {
            assert!(!op.is_config_retryable(), "{op}");
        }
    }
}
