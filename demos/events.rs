//! This example prints every connection event and device list change while scanning.

use blelink::{ControllerConfig, Error, GattController};
use futures::StreamExt;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> Result<(), Error> {
    pretty_env_logger::init();

    let controller = GattController::with_btleplug(ControllerConfig::default()).await?;

    let mut results = controller.connection_result_stream();
    let mut scanned = controller.scanned_devices_stream();
    let mut paired = controller.paired_devices_stream();

    // Print events in a separate task
    let join_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = results.next() => println!("Event: {:?}", event),
                Some(devices) = scanned.next() => println!("Scanned: {} devices", devices.len()),
                Some(devices) = paired.next() => {
                    for device in devices.iter() {
                        println!("Paired: {}", device);
                    }
                }
                else => break,
            }
        }
    });

    controller.start_discovery().await;

    sleep(Duration::from_millis(5000)).await;

    controller.stop_discovery().await;

    for device in controller.get_connected_gatt_devices().await {
        println!("Connected: {}", device);
    }

    controller.release().await;

    join_handle.await.unwrap();

    Ok(())
}
