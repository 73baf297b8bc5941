use super::*;

#[test]
fn test_error_display() {
    let err = SchedulerError::TaskNotFound { id: 42 };
    assert_eq!(err.to_string(), "任务未找到: 42");

    let err = SchedulerError::lock_failed("scheduler:trigger");
    assert_eq!(err.to_string(), "获取锁失败: scheduler:trigger");

    let err = SchedulerError::CycleDetected {
        task_id: 1,
        depend_task_id: 2,
    };
    assert!(err.to_string().contains("循环依赖"));
}

#[test]
fn test_retryable_classification() {
    assert!(SchedulerError::Network("连接被拒绝".into()).is_retryable());
    assert!(SchedulerError::PoolFull.is_retryable());
    assert!(!SchedulerError::TaskNotFound { id: 1 }.is_retryable());
    assert!(!SchedulerError::NoAvailableExecutor.is_retryable());
}

#[test]
fn test_fatal_classification() {
    assert!(SchedulerError::config_error("缺少数据库地址").is_fatal());
    assert!(!SchedulerError::PoolFull.is_fatal());
}

#[test]
fn test_error_codes_are_stable() {
    assert_eq!(SchedulerError::NoAvailableExecutor.code(), 1006);
    assert_eq!(
        SchedulerError::GroupNotFound {
            app_name: "demo".into()
        }
        .code(),
        1002
    );
    assert_eq!(SchedulerError::PoolFull.code(), 1101);
}

#[test]
fn test_from_serde_json() {
    let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: SchedulerError = parse_err.into();
    assert!(matches!(err, SchedulerError::Serialization(_)));
}
