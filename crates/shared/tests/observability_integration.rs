//! 可观测性模块集成测试
//!
//! 测试指标记录、日志配置与初始化守卫。

// ============================================================================
// 指标记录测试
// ============================================================================

mod metrics_tests {
    use factrule_shared::observability::metrics::{
        describe_metrics, record_action_dispatch, record_fact_evaluation, record_rule_evaluation,
        set_rule_set_size,
    };

    #[test]
    fn test_record_rule_evaluation() {
        record_rule_evaluation(true, 0.0001);
        record_rule_evaluation(false, 0.00002);
    }

    #[test]
    fn test_record_fact_evaluation() {
        record_fact_evaluation(0, 0.001);
        record_fact_evaluation(3, 0.002);
    }

    #[test]
    fn test_record_action_dispatch() {
        record_action_dispatch("under_usage_resource", "success");
        record_action_dispatch("inactive_resource", "ARITY_MISMATCH");
        record_action_dispatch("no_match", "HANDLER_FAILED");
    }

    #[test]
    fn test_metrics_with_edge_cases() {
        describe_metrics();
        describe_metrics();

        // 空动作名与极端耗时
        record_action_dispatch("", "success");
        record_rule_evaluation(true, 0.0);
        record_fact_evaluation(usize::MAX, f64::MAX);
        set_rule_set_size(0);
        set_rule_set_size(usize::MAX);
    }
}

// ============================================================================
// 配置测试
// ============================================================================

mod config_tests {
    use factrule_shared::observability::{LogFormat, ObservabilityConfig};

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_config_from_env() {
        // 环境变量可能未设置，只检查不会失败
        let config = ObservabilityConfig::from_env();
        assert!(!config.log_level.is_empty());
    }

    #[test]
    fn test_custom_config() {
        let config = ObservabilityConfig {
            log_level: "rule_engine=debug".to_string(),
            log_format: LogFormat::Json,
        };

        assert_eq!(config.log_level, "rule_engine=debug");
        assert_eq!(config.log_format, LogFormat::Json);
    }
}

// ============================================================================
// 初始化测试
// ============================================================================

mod init_tests {
    use factrule_shared::observability::{self, ObservabilityConfig};

    #[test]
    fn test_init_once_per_process() {
        let config = ObservabilityConfig {
            log_level: "debug".to_string(),
            ..Default::default()
        };

        let guard = observability::init(&config, "observability-test").unwrap();
        assert_eq!(guard.service_name(), "observability-test");

        // 全局订阅者已安装，再次初始化返回错误
        assert!(observability::init(&config, "observability-test").is_err());

        // drop 时不应 panic
        drop(guard);
    }
}
