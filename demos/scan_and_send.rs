//! This example scans for a device with the given name, connects to it and
//! writes a line of text to the first characteristic it exposes.

use blelink::{ConnectionEvent, ControllerConfig, Error, GattController};
use futures::StreamExt;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let name = std::env::args().nth(1).expect("Expected device name");
    let text = std::env::args()
        .nth(2)
        .unwrap_or_else(|| "TOTAL 12.50".to_string());

    pretty_env_logger::init();

    let controller = GattController::with_btleplug(ControllerConfig::default()).await?;

    // Scan until a device with a matching name shows up
    controller.start_discovery().await;
    let mut scanned = controller.scanned_devices_stream();
    let device = loop {
        let devices = scanned.next().await.expect("scanned list stream ended");
        if let Some(device) = devices.iter().find(|d| d.name.as_deref() == Some(name.as_str())) {
            break device.clone();
        }
    };
    controller.stop_discovery().await;

    println!("Connecting to {}", device);

    let mut logs = controller.log_stream();
    tokio::spawn(async move {
        while let Some(line) = logs.next().await {
            println!("{}", line);
        }
    });

    let mut events = controller.connect_to_device(&device).await;
    while let Some(event) = events.next().await {
        match event {
            ConnectionEvent::UuidsDiscovered { .. } => {
                let sent = controller.try_send_message(&text, None, None).await;
                println!("Sent: {:?}", sent);
                break;
            }
            ConnectionEvent::Error(e) => println!("Error: {}", e),
            other => println!("{:?}", other),
        }
    }

    // Give the write a moment to complete
    sleep(Duration::from_secs(1)).await;

    controller.release().await;

    Ok(())
}
