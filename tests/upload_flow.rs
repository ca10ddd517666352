mod common;

use common::{MockCdn, TestApp, PRIVATE_KEY, PUBLIC_KEY};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use video_share::{FileType, SelectedFile, UploadError, Video};

fn progress_sink() -> (Arc<Mutex<Vec<u8>>>, impl Fn(u8) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::<u8>::new()));
    let sink = seen.clone();
    (seen, move |p: u8| sink.lock().unwrap().push(p))
}

#[tokio::test]
async fn upload_publish_and_list() {
    let app = TestApp::spawn(Some(PRIVATE_KEY)).await;
    let cdn = MockCdn::spawn(PRIVATE_KEY, Duration::ZERO).await;
    let token = app.sign_in("creator@example.com", "hunter22").await;
    let client = app.client(&cdn, Some(token));

    let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
    let file = SelectedFile::from_bytes("clip.mp4", "video/mp4", data.clone());
    let (seen, on_progress) = progress_sink();

    let result = client
        .submit_file(file, FileType::Video, on_progress)
        .await
        .unwrap();
    assert!(result.url.ends_with("/videos/clip.mp4"), "{}", result.url);
    assert_eq!(result.size, Some(data.len() as u64));
    assert!(!client.is_busy());

    let progress = seen.lock().unwrap().clone();
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|w| w[0] < w[1]), "{progress:?}");

    let uploads = cdn.uploads().await;
    assert_eq!(uploads.len(), 1);
    let received = &uploads[0];
    assert_eq!(received.data.as_ref(), data.as_slice());
    assert_eq!(received.file_name.as_deref(), Some("clip.mp4"));
    assert_eq!(received.content_type.as_deref(), Some("video/mp4"));
    assert_eq!(received.fields["publicKey"], PUBLIC_KEY);
    assert_eq!(received.fields["folder"], "/videos");
    assert_eq!(received.fields["useUniqueFileName"], "true");

    let video_url = result.url.clone();
    let video = client
        .publish(result, "My clip", "first upload")
        .await
        .unwrap();
    assert_eq!(video.title, "My clip");
    assert_eq!(video.video_url, video_url);
    assert_eq!(video.thumbnail_url, video_url);

    let listed: Vec<Video> = app
        .http
        .get(app.url("/api/videos"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed, vec![video]);
}

#[tokio::test]
async fn uploads_a_file_from_disk() {
    let app = TestApp::spawn(Some(PRIVATE_KEY)).await;
    let cdn = MockCdn::spawn(PRIVATE_KEY, Duration::ZERO).await;
    let token = app.sign_in("disk@example.com", "hunter22").await;
    let client = app.client(&cdn, Some(token));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("holiday.webm");
    let data = vec![7u8; 150_000];
    std::fs::write(&path, &data).unwrap();

    let file = SelectedFile::from_path(&path).await.unwrap();
    assert_eq!(file.media_type, "video/webm");

    let result = client
        .submit_file(file, FileType::Video, |_| {})
        .await
        .unwrap();
    assert_eq!(result.name, "holiday.webm");

    let uploads = cdn.uploads().await;
    assert_eq!(uploads[0].data.len(), data.len());
}

#[tokio::test]
async fn videos_are_listed_newest_first() {
    let app = TestApp::spawn(Some(PRIVATE_KEY)).await;
    let cdn = MockCdn::spawn(PRIVATE_KEY, Duration::ZERO).await;
    let token = app.sign_in("order@example.com", "hunter22").await;
    let client = app.client(&cdn, Some(token));

    for title in ["A", "B", "C"] {
        let file = SelectedFile::from_bytes(format!("{title}.mp4"), "video/mp4", vec![1u8; 16]);
        let result = client
            .submit_file(file, FileType::Video, |_| {})
            .await
            .unwrap();
        client.publish(result, title, "").await.unwrap();
    }

    let listed: Vec<Video> = app
        .http
        .get(app.url("/api/videos"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let titles: Vec<&str> = listed.iter().map(|v| v.title.as_str()).collect();
    assert_eq!(titles, vec!["C", "B", "A"]);
}

#[tokio::test]
async fn second_submission_is_rejected_while_one_is_in_flight() {
    let app = TestApp::spawn(Some(PRIVATE_KEY)).await;
    let cdn = MockCdn::spawn(PRIVATE_KEY, Duration::from_millis(800)).await;
    let token = app.sign_in("busy@example.com", "hunter22").await;
    let client = Arc::new(app.client(&cdn, Some(token)));

    let first = {
        let client = client.clone();
        tokio::spawn(async move {
            let file = SelectedFile::from_bytes("one.mp4", "video/mp4", vec![1u8; 1024]);
            client.submit_file(file, FileType::Video, |_| {}).await
        })
    };

    while !client.is_busy() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let file = SelectedFile::from_bytes("two.mp4", "video/mp4", vec![2u8; 1024]);
    let err = client
        .submit_file(file, FileType::Video, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Busy), "{err}");

    first.await.unwrap().unwrap();
    assert!(!client.is_busy());
    assert_eq!(cdn.uploads().await.len(), 1);

    let file = SelectedFile::from_bytes("three.mp4", "video/mp4", vec![3u8; 1024]);
    client
        .submit_file(file, FileType::Video, |_| {})
        .await
        .unwrap();
    assert_eq!(cdn.uploads().await.len(), 2);
}

#[tokio::test]
async fn abandoned_upload_releases_the_client() {
    let app = TestApp::spawn(Some(PRIVATE_KEY)).await;
    let cdn = MockCdn::spawn(PRIVATE_KEY, Duration::from_secs(5)).await;
    let token = app.sign_in("cancel@example.com", "hunter22").await;
    let client = app.client(&cdn, Some(token));

    let file = SelectedFile::from_bytes("slow.mp4", "video/mp4", vec![1u8; 1024]);
    let attempt = tokio::time::timeout(
        Duration::from_millis(300),
        client.submit_file(file, FileType::Video, |_| {}),
    )
    .await;
    assert!(attempt.is_err());
    assert!(!client.is_busy());
}

#[tokio::test]
async fn cdn_rejects_a_grant_signed_with_another_key() {
    let app = TestApp::spawn(Some(PRIVATE_KEY)).await;
    let cdn = MockCdn::spawn("some_other_private_key", Duration::ZERO).await;
    let token = app.sign_in("forged@example.com", "hunter22").await;
    let client = app.client(&cdn, Some(token));

    let file = SelectedFile::from_bytes("clip.mp4", "video/mp4", vec![1u8; 64]);
    let err = client
        .submit_file(file, FileType::Video, |_| {})
        .await
        .unwrap_err();

    match &err {
        UploadError::Upload { message, .. } => {
            assert!(message.contains("403"), "{message}");
            assert!(message.contains("invalid signature"), "{message}");
        }
        other => panic!("expected an upload error, got {other:?}"),
    }
    assert!(err.is_retryable());
    assert!(!client.is_busy());
    assert!(cdn.uploads().await.is_empty());
}

#[tokio::test]
async fn grant_requires_a_session() {
    let app = TestApp::spawn(Some(PRIVATE_KEY)).await;
    let cdn = MockCdn::spawn(PRIVATE_KEY, Duration::ZERO).await;
    let client = app.client(&cdn, None);

    let file = SelectedFile::from_bytes("clip.mp4", "video/mp4", vec![1u8; 64]);
    let err = client
        .submit_file(file, FileType::Video, |_| {})
        .await
        .unwrap_err();
    match err {
        UploadError::Authorization(message) => assert_eq!(message, "Authentication required"),
        other => panic!("expected an authorization error, got {other:?}"),
    }
    assert!(cdn.uploads().await.is_empty());
}

#[tokio::test]
async fn missing_private_key_surfaces_as_authorization_error() {
    let app = TestApp::spawn(None).await;
    let cdn = MockCdn::spawn(PRIVATE_KEY, Duration::ZERO).await;
    let token = app.sign_in("nokey@example.com", "hunter22").await;
    let client = app.client(&cdn, Some(token));

    let file = SelectedFile::from_bytes("clip.mp4", "video/mp4", vec![1u8; 64]);
    let err = client
        .submit_file(file, FileType::Video, |_| {})
        .await
        .unwrap_err();
    match err {
        UploadError::Authorization(message) => {
            assert_eq!(message, "ImageKit private key not configured")
        }
        other => panic!("expected an authorization error, got {other:?}"),
    }
}

#[tokio::test]
async fn publishing_without_a_session_fails() {
    let app = TestApp::spawn(Some(PRIVATE_KEY)).await;
    let cdn = MockCdn::spawn(PRIVATE_KEY, Duration::ZERO).await;
    let token = app.sign_in("anon@example.com", "hunter22").await;
    let client = app.client(&cdn, Some(token));

    let file = SelectedFile::from_bytes("clip.mp4", "video/mp4", vec![1u8; 64]);
    let result = client
        .submit_file(file, FileType::Video, |_| {})
        .await
        .unwrap();

    let anonymous = app.client(&cdn, None);
    let err = anonymous.publish(result, "title", "").await.unwrap_err();
    assert!(matches!(err, UploadError::Publish(ref m) if m == "Authentication required"));
}
