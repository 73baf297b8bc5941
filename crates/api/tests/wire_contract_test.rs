//! 执行器线上契约测试：内存后端 + 真实 HTTP 往返

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use cronplane_api::{create_routes, AppState};
use cronplane_dispatcher::{
    DispatchService, ExecutorClient, ExecutorRegistry, FiringContext, RegistryConfig,
};
use cronplane_domain::{
    DispatchAck, DispatchRequest, InstanceStatus, Task, TaskGroup, TaskGroupRepository,
    TaskRepository,
};
use cronplane_errors::SchedulerResult;
use cronplane_foundation::{TimeWheel, WorkerPool};
use cronplane_infrastructure::{
    MemoryExecutorRepository, MemoryKvStore, MemoryTaskGroupRepository,
    MemoryTaskInstanceRepository, MemoryTaskLogRepository, MemoryTaskRepository,
};

struct AcceptingClient;

#[async_trait]
impl ExecutorClient for AcceptingClient {
    async fn run(&self, _: &str, _: &DispatchRequest) -> SchedulerResult<DispatchAck> {
        Ok(DispatchAck {
            code: 0,
            message: "接受".into(),
        })
    }

    async fn cancel(&self, _: &str, _: i64) -> SchedulerResult<()> {
        Ok(())
    }
}

struct TestServer {
    base_url: String,
    dispatch: DispatchService,
    task_repo: Arc<MemoryTaskRepository>,
    instance_repo: Arc<MemoryTaskInstanceRepository>,
}

async fn spawn_server() -> TestServer {
    let task_repo = Arc::new(MemoryTaskRepository::new());
    let group_repo = Arc::new(MemoryTaskGroupRepository::new());
    let instance_repo = Arc::new(MemoryTaskInstanceRepository::new());
    let executor_repo = Arc::new(MemoryExecutorRepository::new());

    group_repo
        .create(&TaskGroup::new("演示组".into(), "demo".into()))
        .await
        .unwrap();

    let pool = WorkerPool::new(4, 16);
    let wheel = TimeWheel::new(Duration::from_millis(100), 64, pool.clone()).unwrap();
    let dispatch = DispatchService::new(
        task_repo.clone(),
        instance_repo.clone(),
        executor_repo.clone(),
        Arc::new(MemoryTaskLogRepository::new()),
        Arc::new(MemoryKvStore::new()),
        Arc::new(AcceptingClient),
        wheel,
        pool,
    );
    let registry = ExecutorRegistry::new(group_repo, executor_repo, RegistryConfig::default());

    let app = create_routes(AppState {
        registry,
        dispatch: dispatch.clone(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        dispatch,
        task_repo,
        instance_repo,
    }
}

#[tokio::test]
async fn test_register_heartbeat_unregister_round_trip() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    // 注册
    let body: Value = client
        .post(format!("{}/executor/register", server.base_url))
        .json(&json!({
            "app_name": "demo",
            "host": "10.0.0.1",
            "port": 8080,
            "max_concurrent": 10
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["code"], 0);
    let executor_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["status"], "ONLINE");

    // 心跳
    let response = client
        .post(format!("{}/executor/heartbeat", server.base_url))
        .json(&json!({
            "executor_id": executor_id,
            "app_name": "demo",
            "host": "10.0.0.1",
            "port": 8080,
            "current_load": 3,
            "cpu_usage": 25.0,
            "memory_usage": 40.0
        }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    // 注销
    let response = client
        .post(format!("{}/executor/unregister", server.base_url))
        .json(&json!({ "executor_id": executor_id }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
}

#[tokio::test]
async fn test_register_unknown_group_is_404() {
    let server = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("{}/executor/register", server.base_url))
        .json(&json!({
            "app_name": "不存在",
            "host": "10.0.0.1",
            "port": 8080,
            "max_concurrent": 10
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_heartbeat_unknown_executor_is_404() {
    let server = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("{}/executor/heartbeat", server.base_url))
        .json(&json!({
            "executor_id": "幽灵",
            "app_name": "demo",
            "host": "10.0.0.1",
            "port": 8080,
            "current_load": 0,
            "cpu_usage": 0.0,
            "memory_usage": 0.0
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_callback_drives_instance_to_terminal() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();

    // 注册一个执行器并触发一次派发
    client
        .post(format!("{}/executor/register", server.base_url))
        .json(&json!({
            "app_name": "demo",
            "host": "10.0.0.1",
            "port": 8080,
            "max_concurrent": 10
        }))
        .send()
        .await
        .unwrap();

    let task = server
        .task_repo
        .create(&Task::new(
            1,
            "作业".into(),
            "*/5 * * * * *".into(),
            "handler.run".into(),
        ))
        .await
        .unwrap();
    server
        .dispatch
        .dispatch(FiringContext::cron(task.id, Utc::now()))
        .await
        .unwrap();

    let instance_id = server.instance_repo.snapshot()[0].id;

    // 开始回调: scheduling -> running
    let response = client
        .post(format!("{}/callback/start", server.base_url))
        .json(&json!({ "instance_id": instance_id }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(
        server.instance_repo.snapshot()[0].status,
        InstanceStatus::Running
    );

    // 结果回调: running -> success
    let response = client
        .post(format!("{}/callback", server.base_url))
        .json(&json!({
            "instance_id": instance_id,
            "code": 0,
            "message": "完成"
        }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let instance = &server.instance_repo.snapshot()[0];
    assert_eq!(instance.status, InstanceStatus::Success);
    assert!(instance.end_time.is_some());
}

#[tokio::test]
async fn test_callback_unknown_instance_is_404() {
    let server = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("{}/callback", server.base_url))
        .json(&json!({ "instance_id": 999, "code": 0, "message": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
