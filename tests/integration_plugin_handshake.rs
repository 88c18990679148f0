use dicey::server::plugin::{self, PluginEvent};
use dicey::wire::Value;
use tokio::time::{timeout, Duration};

#[tokio::test]
async fn plugin_completes_handshake_answers_a_command_and_quits() {
    let address = format!("/tmp/dicey-plugin-test-{}.sock", std::process::id());
    let _ = std::fs::remove_file(&address);
    let server = dicey::serve(&address).await.unwrap();

    let (manager, mut events) = plugin::start(server.clone());

    let plugin_path = env!("CARGO_BIN_EXE_demo-plugin");
    manager.spawn(plugin_path).await.unwrap();

    assert!(matches!(
        timeout(Duration::from_secs(1), events.recv()).await.unwrap(),
        Some(PluginEvent::Spawned(_))
    ));
    match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
        Some(PluginEvent::Ready(name)) => assert_eq!(name, "DemoPlugin"),
        other => panic!("expected Ready, got {other:?}"),
    }

    let result = timeout(
        Duration::from_secs(1),
        manager.send_command("DemoPlugin", 1, Value::UInt64(41)),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(result, Value::UInt64(42));

    manager.quit("DemoPlugin");
    let mut saw_quit = false;
    for _ in 0..4 {
        match timeout(Duration::from_secs(2), events.recv()).await.unwrap() {
            Some(PluginEvent::Quit(_)) | Some(PluginEvent::Terminated(_)) => {
                saw_quit = true;
                break;
            }
            Some(PluginEvent::Quitting(_)) => continue,
            other => panic!("unexpected event while quitting: {other:?}"),
        }
    }
    assert!(saw_quit, "plugin never reported exiting");

    server.shutdown();
    let _ = std::fs::remove_file(&address);
}
