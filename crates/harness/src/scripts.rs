//! Page scripts run through `execute_async`.
//!
//! Every script body is prefixed with [`PRELUDE`], which binds the completion
//! callback and the per-page peer registry. Peers live in
//! `window.renegoPeers[name]` so that two endpoints can share one page.

/// Shared helpers. `done` is the WebDriver completion callback.
const PRELUDE: &str = r#"
var done = arguments[arguments.length - 1];
function ok(value) { done({ ok: value === undefined ? null : value }); }
function fail(err) { done({ error: String((err && err.message) || err) }); }
window.renegoPeers = window.renegoPeers || {};
function peer(name) {
  var slot = window.renegoPeers[name];
  if (!slot) { throw new Error('unknown peer ' + name); }
  return slot;
}
function gathered(slot) {
  if (slot.gathered || slot.pc.iceGatheringState === 'complete') { return Promise.resolve(); }
  return new Promise(function (resolve) { slot.waiters.push(resolve); });
}
function localDescription(slot, waitForCandidates) {
  var ready = waitForCandidates ? gathered(slot) : Promise.resolve();
  return ready.then(function () {
    return { type: slot.pc.localDescription.type, sdp: slot.pc.localDescription.sdp };
  });
}
"#;

pub const OPEN_PEER: &str = r#"// renego:open-peer
var name = arguments[0];
try {
  var slot = { pc: new RTCPeerConnection(null), candidates: [], gathered: false, waiters: [] };
  slot.pc.onicecandidate = function (event) {
    slot.candidates.push(event.candidate ? event.candidate.toJSON() : null);
    if (!event.candidate) {
      slot.gathered = true;
      slot.waiters.splice(0).forEach(function (resolve) { resolve(); });
    }
  };
  var video = document.createElement('video');
  video.id = 'remote-' + name;
  video.autoplay = true;
  document.body.appendChild(video);
  slot.pc.ontrack = function (event) { video.srcObject = event.streams[0]; };
  window.renegoPeers[name] = slot;
  ok(null);
} catch (err) {
  fail(err);
}
"#;

pub const CREATE_OFFER: &str = r#"// renego:create-offer
var name = arguments[0], constraints = arguments[1], waitForCandidates = arguments[2];
try {
  var slot = peer(name);
  navigator.mediaDevices.getUserMedia(constraints).then(function (stream) {
    slot.stream = stream;
    stream.getTracks().forEach(function (track) { slot.pc.addTrack(track, stream); });
    return slot.pc.createOffer();
  }).then(function (offer) {
    return slot.pc.setLocalDescription(offer);
  }).then(function () {
    return localDescription(slot, waitForCandidates);
  }).then(function (description) {
    ok({ description: description, streamId: slot.stream.id });
  }).catch(fail);
} catch (err) {
  fail(err);
}
"#;

pub const ACCEPT_OFFER: &str = r#"// renego:accept-offer
var name = arguments[0], offer = arguments[1], waitForCandidates = arguments[2];
try {
  var slot = peer(name);
  slot.pc.setRemoteDescription(new RTCSessionDescription(offer)).then(function () {
    return slot.pc.createAnswer();
  }).then(function (answer) {
    return slot.pc.setLocalDescription(answer);
  }).then(function () {
    return localDescription(slot, waitForCandidates);
  }).then(ok).catch(fail);
} catch (err) {
  fail(err);
}
"#;

pub const ACCEPT_ANSWER: &str = r#"// renego:accept-answer
var name = arguments[0], answer = arguments[1];
try {
  peer(name).pc.setRemoteDescription(new RTCSessionDescription(answer)).then(function () {
    ok(null);
  }).catch(fail);
} catch (err) {
  fail(err);
}
"#;

/// `shared` attaches the new track to the stream of the first offer;
/// `separate` attaches it to the stream the camera returned.
pub const ADD_VIDEO_AND_REOFFER: &str = r#"// renego:add-video-and-reoffer
var name = arguments[0], constraints = arguments[1], attachment = arguments[2];
var waitForCandidates = arguments[3];
try {
  var slot = peer(name);
  navigator.mediaDevices.getUserMedia(constraints).then(function (stream) {
    var track = stream.getVideoTracks()[0];
    var owner = attachment === 'shared' ? slot.stream : stream;
    if (owner !== stream) { owner.addTrack(track); }
    slot.pc.addTrack(track, owner);
    slot.videoStreamId = owner.id;
    return slot.pc.createOffer();
  }).then(function (offer) {
    return slot.pc.setLocalDescription(offer);
  }).then(function () {
    return localDescription(slot, waitForCandidates);
  }).then(function (description) {
    ok({ description: description, streamId: slot.videoStreamId });
  }).catch(fail);
} catch (err) {
  fail(err);
}
"#;

pub const DRAIN_CANDIDATES: &str = r#"// renego:drain-candidates
try {
  ok(peer(arguments[0]).candidates.splice(0));
} catch (err) {
  fail(err);
}
"#;

pub const ADD_CANDIDATES: &str = r#"// renego:add-candidates
var name = arguments[0], candidates = arguments[1];
try {
  var slot = peer(name);
  Promise.all(candidates.map(function (candidate) {
    return slot.pc.addIceCandidate(new RTCIceCandidate(candidate));
  })).then(function () { ok(null); }).catch(fail);
} catch (err) {
  fail(err);
}
"#;

/// Returns the remote video size and the RGBA pixels of its top-left tenth,
/// base64 encoded. Frames with an edge under 10 pixels come back zeroed.
pub const CAPTURE_FRAME: &str = r#"// renego:capture-frame
try {
  var video = document.getElementById('remote-' + arguments[0]);
  var width = video ? video.videoWidth : 0;
  var height = video ? video.videoHeight : 0;
  var sampleWidth = Math.floor(width / 10), sampleHeight = Math.floor(height / 10);
  if (sampleWidth === 0 || sampleHeight === 0) {
    ok({ width: 0, height: 0, pixels: '' });
  } else {
    var canvas = document.createElement('canvas');
    canvas.width = width;
    canvas.height = height;
    var context = canvas.getContext('2d');
    context.drawImage(video, 0, 0, width, height);
    var data = context.getImageData(0, 0, sampleWidth, sampleHeight).data;
    var binary = '';
    for (var i = 0; i < data.length; i++) { binary += String.fromCharCode(data[i]); }
    ok({ width: width, height: height, pixels: btoa(binary) });
  }
} catch (err) {
  fail(err);
}
"#;

pub const CLOSE_PEER: &str = r#"// renego:close-peer
try {
  var slot = window.renegoPeers[arguments[0]];
  if (slot) {
    slot.pc.close();
    if (slot.stream) { slot.stream.getTracks().forEach(function (track) { track.stop(); }); }
    delete window.renegoPeers[arguments[0]];
  }
  ok(null);
} catch (err) {
  fail(err);
}
"#;

pub const USER_AGENT: &str = "return navigator.userAgent;";

/// Prefix `body` with the shared helpers.
pub fn with_prelude(body: &str) -> String {
    format!("{PRELUDE}\n{body}")
}
