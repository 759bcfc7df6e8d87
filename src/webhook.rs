use crate::types::{CapturedFrame, GpsFix};
use crate::now_secs;
use bytes::Buf;
use futures::StreamExt;
use image::io::Reader as ImageReader;
use log::{debug, error, info, warn};
use std::io::Cursor;
use tokio::sync::mpsc::Sender;
use warp::Filter;

#[derive(Debug)]
struct HandleFrameError;

impl warp::reject::Reject for HandleFrameError {}

pub async fn run(port: u16, tx: Sender<CapturedFrame>) {
    info!("Accepting frames on port {}", port);
    warp::serve(routes(tx)).run(([0, 0, 0, 0], port)).await;
}

fn routes(
    tx: Sender<CapturedFrame>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::post()
        .and(warp::path!("frame"))
        .and(warp::filters::multipart::form())
        .and(warp::any().map(move || tx.clone()))
        .and_then(|form, tx| async {
            let result = handle_frame(form, tx).await;
            if let Err(e) = &result {
                error!("Error handling frame: {:?}", e);
            }
            result.map_err(|_| warp::reject::custom(HandleFrameError))
        })
}

async fn read_part(part: warp::filters::multipart::Part) -> Result<Vec<u8>, warp::Error> {
    let mut data: Vec<u8> = vec![];
    let mut stream = part.stream();
    while let Some(buf) = stream.next().await {
        data.extend_from_slice(buf?.bytes());
    }
    Ok(data)
}

async fn handle_frame(
    mut form: warp::filters::multipart::FormData,
    mut tx: Sender<CapturedFrame>,
) -> Result<impl warp::Reply, failure::Error> {
    let mut image: Option<image::DynamicImage> = None;
    let mut latitude: Option<f64> = None;
    let mut longitude: Option<f64> = None;
    let mut source = "webhook".to_string();

    while let Some(part) = form.next().await {
        let part = part?;
        let name = part.name().to_string();
        debug!("Got part {}", name);
        match name.as_str() {
            "frame" => {
                let data = read_part(part).await?;
                image = Some(
                    ImageReader::new(Cursor::new(data))
                        .with_guessed_format()?
                        .decode()?,
                );
            }
            "lat" => latitude = Some(parse_coordinate(&read_part(part).await?)?),
            "lon" => longitude = Some(parse_coordinate(&read_part(part).await?)?),
            "camera" => source = String::from_utf8_lossy(&read_part(part).await?).trim().to_string(),
            _ => warn!("Ignoring part {}", name),
        }
    }

    let image = image.ok_or_else(|| format_err!("Missing frame part"))?;
    let fix = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(GpsFix {
            latitude,
            longitude,
        }),
        _ => None,
    };
    info!("Queueing frame from {}", source);
    tx.send(CapturedFrame {
        source,
        image,
        fix,
        captured_at: now_secs(),
    })
    .await
    .map_err(|_| format_err!("Frame processor has shut down"))?;

    Ok(warp::reply())
}

fn parse_coordinate(data: &[u8]) -> Result<f64, failure::Error> {
    let text = std::str::from_utf8(data)?.trim();
    text.parse()
        .map_err(|_| format_err!("Invalid coordinate {:?}", text))
}
