use super::error::{Result, RtpError};
use super::track_info::{TrackSdpInfo, TrackSdpInfoRepository};
use shig_protocol::Purpose;
use uuid::Uuid;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::sdp::description::media::MediaDescription;
use webrtc::sdp::description::session::SessionDescription;

fn is_media(desc: &MediaDescription) -> bool {
    matches!(desc.media_name.media.as_str(), "audio" | "video")
}

/// Track id of the `msid:<stream> <track>` attribute
fn msid_track_id(desc: &MediaDescription) -> Option<String> {
    let msid = desc.attribute("msid").flatten()?;
    let mut parts = msid.split_whitespace();
    let (_stream, track) = (parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    Some(track.to_string())
}

fn parse(sdp: &RTCSessionDescription) -> Result<SessionDescription> {
    sdp.unmarshal().map_err(|e| RtpError::InvalidSdp(e.to_string()))
}

fn rebuild(
    origin: &RTCSessionDescription,
    parsed: &SessionDescription,
) -> Result<RTCSessionDescription> {
    let sdp = parsed.marshal();
    let rebuilt = match origin.sdp_type {
        RTCSdpType::Offer => RTCSessionDescription::offer(sdp)?,
        RTCSdpType::Answer => RTCSessionDescription::answer(sdp)?,
        RTCSdpType::Pranswer => RTCSessionDescription::pranswer(sdp)?,
        other => {
            return Err(RtpError::InvalidSdp(format!(
                "cannot rewrite a {} description",
                other
            )));
        }
    };
    Ok(rebuilt)
}

/// Reads the track infos a publisher announces in its offer.
///
/// Every audio/video section with an `msid` yields one info; its media title,
/// if present, sets purpose, mute state and free text.
pub fn ingress_track_sdp_infos(
    offer: &RTCSessionDescription,
    session_id: Uuid,
) -> Result<Vec<TrackSdpInfo>> {
    let parsed = parse(offer)?;
    let mut infos = Vec::new();

    for desc in parsed.media_descriptions.iter().filter(|d| is_media(d)) {
        let Some(track_id) = msid_track_id(desc) else {
            continue;
        };
        let mut info = TrackSdpInfo::new(session_id);
        if let Some(title) = &desc.media_title {
            info.apply_media_title(title);
        }
        if let Some(Some(mid)) = desc.attribute("mid") {
            info.ingress_mid = mid.to_string();
        }
        info.ingress_track_id = track_id;
        infos.push(info);
    }
    Ok(infos)
}

/// Marks every media section of the given stream as the main stream.
///
/// Used by publishers (and tests) that want their media forwarded to the
/// live bridge.
pub fn mark_stream_as_main(
    sdp: &RTCSessionDescription,
    stream_id: &str,
) -> Result<RTCSessionDescription> {
    let mut parsed = parse(sdp)?;
    for desc in parsed.media_descriptions.iter_mut().filter(|d| is_media(d)) {
        let is_stream = desc
            .attribute("msid")
            .flatten()
            .is_some_and(|msid| msid.split_whitespace().next() == Some(stream_id));
        if is_stream {
            let mut info = TrackSdpInfo::new(Uuid::nil());
            info.purpose = Purpose::Main;
            info.info = "Main".to_string();
            desc.media_title = Some(info.media_title());
        }
    }
    rebuild(sdp, &parsed)
}

/// Writes the media title of each sent track into an egress description and
/// records the mid the track ended up on.
pub async fn set_egress_track_info(
    sdp: &RTCSessionDescription,
    repo: &TrackSdpInfoRepository,
) -> Result<RTCSessionDescription> {
    let mut parsed = parse(sdp)?;
    for desc in parsed.media_descriptions.iter_mut().filter(|d| is_media(d)) {
        let Some(track_id) = msid_track_id(desc) else {
            continue;
        };
        let Some(info) = repo.by_egress_track_id(&track_id).await else {
            continue;
        };
        desc.media_title = Some(info.media_title());
        if let Some(Some(mid)) = desc.attribute("mid") {
            let mid = mid.to_string();
            repo.update(info.id, |i| i.egress_mid = mid).await;
        }
    }
    rebuild(sdp, &parsed)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const PUBLISHER_OFFER: &str = "v=0\r\n\
o=- 4215775240449105457 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=msid:stream-a audio-a\r\n\
a=sendonly\r\n\
a=rtpmap:111 opus/48000/2\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
i=2 1 Main camera\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=msid:stream-a video-a\r\n\
a=sendonly\r\n\
a=rtpmap:96 VP8/90000\r\n";

    pub(crate) fn publisher_offer() -> RTCSessionDescription {
        RTCSessionDescription::offer(PUBLISHER_OFFER.to_string()).unwrap()
    }

    #[test]
    fn reads_ingress_track_infos() {
        let session = Uuid::new_v4();
        let infos = ingress_track_sdp_infos(&publisher_offer(), session).unwrap();
        assert_eq!(infos.len(), 2);

        let audio = infos.iter().find(|i| i.ingress_track_id == "audio-a").unwrap();
        assert_eq!(audio.ingress_mid, "0");
        assert_eq!(audio.purpose, Purpose::Guest);
        assert_eq!(audio.session_id, session);

        let video = infos.iter().find(|i| i.ingress_track_id == "video-a").unwrap();
        assert_eq!(video.ingress_mid, "1");
        assert_eq!(video.purpose, Purpose::Main);
        assert!(video.mute);
        assert_eq!(video.info, "Main camera");
    }

    #[test]
    fn marks_stream_as_main() {
        let marked = mark_stream_as_main(&publisher_offer(), "stream-a").unwrap();
        let infos = ingress_track_sdp_infos(&marked, Uuid::new_v4()).unwrap();
        assert!(infos.iter().all(|i| i.purpose == Purpose::Main));
        assert_eq!(marked.sdp_type, RTCSdpType::Offer);
    }

    #[tokio::test]
    async fn writes_egress_track_info() {
        let repo = TrackSdpInfoRepository::new();
        let mut info = TrackSdpInfo::new(Uuid::new_v4());
        info.egress_track_id = "video-a".to_string();
        info.purpose = Purpose::Main;
        info.info = "stage".to_string();
        repo.set(info.clone()).await;

        let munged = set_egress_track_info(&publisher_offer(), &repo).await.unwrap();
        assert!(munged.sdp.contains("i=2 2 stage"));
        assert_eq!(repo.get(info.id).await.unwrap().egress_mid, "1");
    }
}
