//! Helpers shared by unit tests.
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::{
    api::SplitApi,
    dtos::{ChangeNumber, SegmentChangesResponse, Split, SplitChangesResponse},
    readiness::SdkEvent,
    Error, Result,
};

/// A scripted answer of [`MockSplitApi`].
pub enum Scripted<T> {
    Respond(T),
    Fail(Error),
    /// Respond after a delay (use with paused time).
    Delay(Duration, T),
}

impl<T> Scripted<T> {
    async fn resolve(self) -> Result<T> {
        match self {
            Scripted::Respond(value) => Ok(value),
            Scripted::Fail(err) => Err(err),
            Scripted::Delay(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
        }
    }
}

/// In-process [`SplitApi`] answering from scripted queues. When a queue is empty, it answers
/// "no changes" for the requested `since`.
#[derive(Default)]
pub struct MockSplitApi {
    split_changes: Mutex<VecDeque<Scripted<SplitChangesResponse>>>,
    segment_changes: Mutex<HashMap<String, VecDeque<Scripted<SegmentChangesResponse>>>>,
    my_segments: Mutex<VecDeque<Scripted<Vec<String>>>>,
    split_calls: Mutex<Vec<(ChangeNumber, bool, Option<ChangeNumber>)>>,
    segment_calls: Mutex<Vec<(String, ChangeNumber, bool, Option<ChangeNumber>)>>,
    my_segments_calls: Mutex<Vec<(String, bool)>>,
}

impl MockSplitApi {
    pub fn new() -> MockSplitApi {
        MockSplitApi::default()
    }

    pub fn script_split_changes(
        &self,
        answers: impl IntoIterator<Item = Scripted<SplitChangesResponse>>,
    ) {
        self.split_changes.lock().unwrap().extend(answers);
    }

    pub fn script_segment_changes(
        &self,
        segment: &str,
        answers: impl IntoIterator<Item = Scripted<SegmentChangesResponse>>,
    ) {
        self.segment_changes
            .lock()
            .unwrap()
            .entry(segment.to_owned())
            .or_default()
            .extend(answers);
    }

    pub fn script_my_segments(&self, answers: impl IntoIterator<Item = Scripted<Vec<String>>>) {
        self.my_segments.lock().unwrap().extend(answers);
    }

    /// `(since, no_cache, till)` of every split changes request.
    pub fn split_calls(&self) -> Vec<(ChangeNumber, bool, Option<ChangeNumber>)> {
        self.split_calls.lock().unwrap().clone()
    }

    /// `(segment, since, no_cache, till)` of every segment changes request.
    pub fn segment_calls(&self) -> Vec<(String, ChangeNumber, bool, Option<ChangeNumber>)> {
        self.segment_calls.lock().unwrap().clone()
    }

    /// `(key, no_cache)` of every my-segments request.
    pub fn my_segments_calls(&self) -> Vec<(String, bool)> {
        self.my_segments_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SplitApi for MockSplitApi {
    async fn fetch_split_changes(
        &self,
        since: ChangeNumber,
        no_cache: bool,
        till: Option<ChangeNumber>,
    ) -> Result<SplitChangesResponse> {
        self.split_calls.lock().unwrap().push((since, no_cache, till));
        let answer = self.split_changes.lock().unwrap().pop_front();
        match answer {
            Some(answer) => answer.resolve().await,
            None => Ok(split_changes(vec![], since, since)),
        }
    }

    async fn fetch_segment_changes(
        &self,
        segment: &str,
        since: ChangeNumber,
        no_cache: bool,
        till: Option<ChangeNumber>,
    ) -> Result<SegmentChangesResponse> {
        self.segment_calls
            .lock()
            .unwrap()
            .push((segment.to_owned(), since, no_cache, till));
        let answer = self
            .segment_changes
            .lock()
            .unwrap()
            .get_mut(segment)
            .and_then(VecDeque::pop_front);
        match answer {
            Some(answer) => answer.resolve().await,
            None => Ok(segment_changes(segment, &[], &[], since, since)),
        }
    }

    async fn fetch_my_segments(&self, key: &str, no_cache: bool) -> Result<Vec<String>> {
        self.my_segments_calls
            .lock()
            .unwrap()
            .push((key.to_owned(), no_cache));
        let answer = self.my_segments.lock().unwrap().pop_front();
        match answer {
            Some(answer) => answer.resolve().await,
            None => Ok(Vec::new()),
        }
    }
}

/// A split definition with one `IN_SEGMENT` condition per segment.
pub fn split(name: &str, status: &str, segments: &[&str]) -> Split {
    let conditions: Vec<_> = segments
        .iter()
        .map(|segment| {
            serde_json::json!({
                "conditionType": "ROLLOUT",
                "matcherGroup": {
                    "combiner": "AND",
                    "matchers": [{
                        "matcherType": "IN_SEGMENT",
                        "negate": false,
                        "userDefinedSegmentMatcherData": { "segmentName": segment },
                    }],
                },
            })
        })
        .collect();

    serde_json::from_value(serde_json::json!({
        "name": name,
        "status": status,
        "trafficTypeName": "user",
        "killed": false,
        "defaultTreatment": "off",
        "conditions": conditions,
    }))
    .unwrap()
}

pub fn split_changes(
    splits: Vec<Split>,
    since: ChangeNumber,
    till: ChangeNumber,
) -> SplitChangesResponse {
    SplitChangesResponse {
        splits,
        since,
        till,
    }
}

pub fn segment_changes(
    name: &str,
    added: &[&str],
    removed: &[&str],
    since: ChangeNumber,
    till: ChangeNumber,
) -> SegmentChangesResponse {
    SegmentChangesResponse {
        name: name.to_owned(),
        added: added.iter().map(|key| key.to_string()).collect(),
        removed: removed.iter().map(|key| key.to_string()).collect(),
        since,
        till,
    }
}

/// Collect the events received so far.
pub fn drain(events: &mut broadcast::Receiver<SdkEvent>) -> Vec<SdkEvent> {
    let mut result = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => result.push(event),
            Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => return result,
        }
    }
}
