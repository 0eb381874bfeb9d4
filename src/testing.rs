// 测试用的内存网盘
//
// 实现 ApiTransport，按接口路径模拟开放平台：
// - list v1/v2（分页、回收站、脚本化失败）
// - mkdir、创建上传任务（秒传/重名策略）、分片、完成确认（校验中）、单步上传
// - 下载地址与下载（可模拟失败和内容损坏）
// - 图床：预上传、签名地址 PUT 分片、完成与异步结果轮询、详情
// 所有请求都会记录路径，测试可断言调用次数

use crate::downloader::DownloadOptions;
use crate::error::{PanError, PanResult};
use crate::netdisk::client::SINGLE_UPLOAD_MAX_BYTES;
use crate::netdisk::{
    ApiRequest, ApiTransport, DuplicatePolicy, MultipartUpload, Pan123Client, RawResponse,
    CODE_VERIFYING,
};
use crate::remote::{EntryKind, RemoteEntry, ROOT_ID};
use crate::uploader::rapid_upload::md5_hex;
use crate::uploader::UploadOptions;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const UPLOAD_SERVER: &str = "https://upload.fake.test";
const DOWNLOAD_HOST: &str = "https://download.fake.test";

/// 自动分配的 ID 从这里开始，避开测试里手工指定的 ID
const FIRST_AUTO_ID: i64 = 1000;

/// 测试用上传参数：不等待，完成确认超时 5 秒
pub(crate) fn test_upload_options(chunk_threshold: u64) -> UploadOptions {
    UploadOptions {
        chunk_threshold,
        single_limit: SINGLE_UPLOAD_MAX_BYTES,
        slice_workers: 2,
        slice_attempts: 2,
        duplicate: DuplicatePolicy::KeepBoth,
        completion_timeout: Duration::from_secs(5),
        poll_interval: Duration::ZERO,
    }
}

pub(crate) fn test_download_options(max_tries: u32) -> DownloadOptions {
    DownloadOptions {
        overwrite: false,
        max_tries,
        retry_wait: Duration::ZERO,
    }
}

/// 脚本化的失败响应
#[derive(Debug, Clone)]
pub(crate) enum FakeFailure {
    /// HTTP 429
    RateLimitedHttp,
    /// code 429
    RateLimitedCode,
    /// 无法解析的响应体
    Malformed,
    ApiCode(i64),
    Network,
    /// 处理请求的任务直接 panic
    Panic,
}

impl FakeFailure {
    fn respond(&self) -> PanResult<RawResponse> {
        match self {
            FakeFailure::RateLimitedHttp => Ok(RawResponse {
                status: 429,
                body: String::new(),
            }),
            FakeFailure::RateLimitedCode => Ok(api_error(429, "操作频繁")),
            FakeFailure::Malformed => Ok(RawResponse::ok("<html>gateway</html>")),
            FakeFailure::ApiCode(code) => Ok(api_error(*code, "fake failure")),
            FakeFailure::Network => Err(PanError::Network("connection reset by fake".to_string())),
            FakeFailure::Panic => panic!("fake drive panic"),
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    id: i64,
    name: String,
    parent: i64,
    is_dir: bool,
    content: Vec<u8>,
    etag: String,
    trashed: bool,
}

#[derive(Debug)]
struct PendingUpload {
    parent: i64,
    name: String,
    duplicate: u8,
    etag: String,
    size: u64,
    slice_size: u64,
    slices: BTreeMap<u32, Vec<u8>>,
    verify_left: u32,
}

#[derive(Debug, Clone)]
struct ImageNode {
    id: String,
    name: String,
    parent: String,
    content: Vec<u8>,
    etag: String,
}

#[derive(Debug)]
struct PendingImage {
    parent: String,
    name: String,
    etag: String,
    size: u64,
    slices: BTreeMap<u32, Vec<u8>>,
    async_left: u32,
}

#[derive(Debug, Default)]
struct State {
    nodes: Vec<Node>,
    next_id: i64,
    links: HashMap<i64, Vec<i64>>,
    calls: Vec<String>,

    list_failures: VecDeque<FakeFailure>,
    fail_streak_target: u32,
    fail_streak: u32,
    permanent_list_failure: Option<FakeFailure>,
    dir_failures: HashMap<i64, FakeFailure>,
    create_failures: VecDeque<FakeFailure>,

    slice_size: u64,
    verify_polls: u32,
    uploads: HashMap<String, PendingUpload>,
    next_preupload: u64,
    slice_uploads: usize,
    failing_slices: HashSet<u32>,
    failing_uploads: Vec<String>,

    corrupt: HashMap<i64, u32>,
    download_failures: HashMap<i64, u32>,

    images: Vec<ImageNode>,
    image_uploads: HashMap<String, PendingImage>,
    image_async_polls: u32,
    image_puts: usize,
}

#[derive(Clone)]
pub(crate) struct FakeDrive {
    state: Arc<Mutex<State>>,
}

impl FakeDrive {
    pub(crate) fn new() -> Self {
        let state = State {
            next_id: FIRST_AUTO_ID,
            slice_size: 1024,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// 不限速的客户端
    pub(crate) fn client(&self) -> Pan123Client {
        Pan123Client::unthrottled(Arc::new(self.clone()))
    }

    // ---------------- 图床 ----------------

    /// 上传完毕后需要轮询异步结果的次数；0 表示同步完成
    pub(crate) fn set_image_async_polls(&self, polls: u32) {
        self.state.lock().image_async_polls = polls;
    }

    pub(crate) fn add_image(&self, parent: &str, name: &str, content: &[u8]) -> String {
        let mut s = self.state.lock();
        let id = s.alloc_image_id();
        s.images.push(ImageNode {
            id: id.clone(),
            name: name.to_string(),
            parent: parent.to_string(),
            content: content.to_vec(),
            etag: md5_hex(content),
        });
        id
    }

    pub(crate) fn image_content(&self, id: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .images
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.content.clone())
    }

    /// 已 PUT 的图床分片数
    pub(crate) fn image_puts(&self) -> usize {
        self.state.lock().image_puts
    }

    // ---------------- 构造目录树 ----------------

    pub(crate) fn add_dir(&self, parent: i64, name: &str) -> i64 {
        let mut s = self.state.lock();
        let id = s.alloc_id();
        s.push_node(id, parent, name, true, Vec::new());
        id
    }

    pub(crate) fn add_dir_with_id(&self, parent: i64, id: i64, name: &str) -> i64 {
        let mut s = self.state.lock();
        s.reserve_id(id);
        s.push_node(id, parent, name, true, Vec::new());
        id
    }

    pub(crate) fn add_file(&self, parent: i64, name: &str, content: &[u8]) -> i64 {
        let mut s = self.state.lock();
        let id = s.alloc_id();
        s.push_node(id, parent, name, false, content.to_vec());
        id
    }

    pub(crate) fn add_file_with_id(&self, parent: i64, id: i64, name: &str, content: &[u8]) -> i64 {
        let mut s = self.state.lock();
        s.reserve_id(id);
        s.push_node(id, parent, name, false, content.to_vec());
        id
    }

    pub(crate) fn set_trashed(&self, id: i64) {
        if let Some(node) = self.state.lock().node_mut(id) {
            node.trashed = true;
        }
    }

    /// 额外把 `child` 列在 `parent` 下（可构造环）
    pub(crate) fn link_child(&self, parent: i64, child: i64) {
        self.state.lock().links.entry(parent).or_default().push(child);
    }

    // ---------------- 脚本化失败 ----------------

    /// 接下来的列表请求依次返回这些失败
    pub(crate) fn fail_next_lists(&self, failures: Vec<FakeFailure>) {
        self.state.lock().list_failures.extend(failures);
    }

    /// 每次成功的列表请求之前先失败 `n` 次
    pub(crate) fn fail_every_list_before_success(&self, n: u32) {
        let mut s = self.state.lock();
        s.fail_streak_target = n;
        s.fail_streak = 0;
    }

    pub(crate) fn fail_lists_permanently(&self, failure: FakeFailure) {
        self.state.lock().permanent_list_failure = Some(failure);
    }

    /// 该目录的列表请求总是失败
    pub(crate) fn fail_listing_of(&self, dir_id: i64, failure: FakeFailure) {
        self.state.lock().dir_failures.insert(dir_id, failure);
    }

    pub(crate) fn fail_next_creates(&self, failures: Vec<FakeFailure>) {
        self.state.lock().create_failures.extend(failures);
    }

    /// 文件名以 `suffix` 结尾的上传请求返回网络错误
    pub(crate) fn fail_upload(&self, suffix: &str) {
        self.state.lock().failing_uploads.push(suffix.to_string());
    }

    /// 该序号的分片上传总是失败
    pub(crate) fn fail_slice(&self, slice_no: u32) {
        self.state.lock().failing_slices.insert(slice_no);
    }

    pub(crate) fn set_slice_size(&self, size: u64) {
        self.state.lock().slice_size = size.max(1);
    }

    /// 完成确认前返回 "校验中" 的次数
    pub(crate) fn set_verify_polls(&self, polls: u32) {
        self.state.lock().verify_polls = polls;
    }

    /// 接下来 `times` 次下载该文件时内容损坏
    pub(crate) fn corrupt_downloads(&self, id: i64, times: u32) {
        self.state.lock().corrupt.insert(id, times);
    }

    /// 接下来 `times` 次下载该文件时网络失败
    pub(crate) fn fail_downloads(&self, id: i64, times: u32) {
        self.state.lock().download_failures.insert(id, times);
    }

    // ---------------- 查询 ----------------

    pub(crate) fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == path).count()
    }

    pub(crate) fn slice_uploads(&self) -> usize {
        self.state.lock().slice_uploads
    }

    pub(crate) fn name_of(&self, id: i64) -> Option<String> {
        self.state.lock().node(id).map(|n| n.name.clone())
    }

    pub(crate) fn parent_of(&self, id: i64) -> Option<i64> {
        self.state.lock().node(id).map(|n| n.parent)
    }

    pub(crate) fn etag_of(&self, id: i64) -> Option<String> {
        self.state.lock().node(id).map(|n| n.etag.clone())
    }

    pub(crate) fn content_of(&self, id: i64) -> Option<Vec<u8>> {
        self.state
            .lock()
            .node(id)
            .filter(|n| !n.is_dir)
            .map(|n| n.content.clone())
    }

    /// 目录下未删除的同名条目
    pub(crate) fn children_named(&self, parent: i64, name: &str) -> Vec<i64> {
        self.state
            .lock()
            .nodes
            .iter()
            .filter(|n| n.parent == parent && n.name == name && !n.trashed)
            .map(|n| n.id)
            .collect()
    }

    /// 按绝对路径查找（不区分文件和目录）
    pub(crate) fn find_path(&self, path: &str) -> Option<i64> {
        let s = self.state.lock();
        let mut current = ROOT_ID;
        for segment in path.split('/').filter(|p| !p.is_empty()) {
            current = s
                .nodes
                .iter()
                .find(|n| n.parent == current && n.name == segment && !n.trashed)?
                .id;
        }
        Some(current)
    }

    /// 条目信息，`relative_path` 为文件名
    pub(crate) fn entry(&self, id: i64) -> Option<RemoteEntry> {
        let s = self.state.lock();
        let node = s.node(id)?;
        Some(RemoteEntry {
            id: node.id,
            name: node.name.clone(),
            kind: if node.is_dir {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            trashed: node.trashed,
            etag: node.etag.clone(),
            size: node.content.len() as u64,
            parent_id: node.parent,
            full_path: s.path_of(id),
            relative_path: node.name.clone(),
        })
    }
}

impl State {
    fn alloc_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn alloc_image_id(&mut self) -> String {
        format!("img-{}", self.alloc_id())
    }

    fn reserve_id(&mut self, id: i64) {
        if id >= self.next_id {
            self.next_id = id + 1;
        }
    }

    fn push_node(&mut self, id: i64, parent: i64, name: &str, is_dir: bool, content: Vec<u8>) {
        let etag = if is_dir {
            String::new()
        } else {
            md5_hex(&content)
        };
        self.nodes.push(Node {
            id,
            name: name.to_string(),
            parent,
            is_dir,
            content,
            etag,
            trashed: false,
        });
    }

    fn node(&self, id: i64) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn node_mut(&mut self, id: i64) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    fn path_of(&self, id: i64) -> String {
        let mut segments = Vec::new();
        let mut current = id;
        while let Some(node) = self.node(current) {
            segments.push(node.name.clone());
            if node.parent == ROOT_ID || segments.len() > 64 {
                break;
            }
            current = node.parent;
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    fn children(&self, parent: i64) -> Vec<&Node> {
        let mut children: Vec<&Node> = self.nodes.iter().filter(|n| n.parent == parent).collect();
        if let Some(linked) = self.links.get(&parent) {
            children.extend(linked.iter().filter_map(|id| self.node(*id)));
        }
        children
    }

    /// 列表请求的脚本化失败
    fn list_failure(&mut self, parent: i64) -> Option<FakeFailure> {
        if let Some(f) = self.permanent_list_failure.clone() {
            return Some(f);
        }
        if let Some(f) = self.list_failures.pop_front() {
            return Some(f);
        }
        if let Some(f) = self.dir_failures.get(&parent) {
            return Some(f.clone());
        }
        if self.fail_streak < self.fail_streak_target {
            self.fail_streak += 1;
            return Some(FakeFailure::Malformed);
        }
        self.fail_streak = 0;
        None
    }

    fn find_dir(&self, parent: i64, name: &str) -> Option<i64> {
        self.nodes
            .iter()
            .find(|n| n.parent == parent && n.name == name && n.is_dir && !n.trashed)
            .map(|n| n.id)
    }

    /// containDir 时逐级建立目录，返回 (父目录, 文件名)
    fn prepare_parent(&mut self, parent: i64, filename: &str, contain_dir: bool) -> (i64, String) {
        if !contain_dir {
            return (parent, filename.to_string());
        }
        let segments: Vec<&str> = filename.split('/').filter(|s| !s.is_empty()).collect();
        let Some((name, dirs)) = segments.split_last() else {
            return (parent, filename.to_string());
        };
        let mut current = parent;
        for dir in dirs {
            current = match self.find_dir(current, dir) {
                Some(id) => id,
                None => {
                    let id = self.alloc_id();
                    self.push_node(id, current, dir, true, Vec::new());
                    id
                }
            };
        }
        (current, name.to_string())
    }

    fn content_by_etag(&self, etag: &str) -> Option<Vec<u8>> {
        self.nodes
            .iter()
            .find(|n| !n.is_dir && n.etag.eq_ignore_ascii_case(etag))
            .map(|n| n.content.clone())
    }

    /// 按重名策略放置文件
    fn place_file(&mut self, parent: i64, name: &str, duplicate: u8, content: Vec<u8>) -> i64 {
        let taken = |s: &State, candidate: &str| {
            s.nodes
                .iter()
                .any(|n| n.parent == parent && n.name == candidate && !n.trashed && !n.is_dir)
        };

        let final_name = if !taken(self, name) {
            name.to_string()
        } else if duplicate == DuplicatePolicy::Overwrite.code() {
            self.nodes
                .retain(|n| !(n.parent == parent && n.name == name && !n.trashed && !n.is_dir));
            name.to_string()
        } else {
            let (stem, ext) = match name.rfind('.') {
                Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
                _ => (name, ""),
            };
            let mut k = 1;
            loop {
                let candidate = format!("{}({}){}", stem, k, ext);
                if !taken(self, &candidate) {
                    break candidate;
                }
                k += 1;
            }
        };

        let id = self.alloc_id();
        self.push_node(id, parent, &final_name, false, content);
        id
    }

    fn failing_upload(&self, filename: &str) -> bool {
        self.failing_uploads.iter().any(|s| filename.ends_with(s.as_str()))
    }
}

fn ok(data: Value) -> RawResponse {
    RawResponse::ok(json!({ "code": 0, "message": "ok", "data": data }).to_string())
}

fn api_error(code: i64, message: &str) -> RawResponse {
    RawResponse::ok(json!({ "code": code, "message": message, "data": null }).to_string())
}

fn file_json(node: &Node, id_key: &str) -> Value {
    json!({
        id_key: node.id,
        "filename": node.name,
        "type": if node.is_dir { 1 } else { 0 },
        "size": node.content.len(),
        "etag": node.etag,
        "status": 0,
        "parentFileId": node.parent,
        "trashed": if node.trashed { 1 } else { 0 },
    })
}

fn query_i64(request: &ApiRequest, key: &str) -> Option<i64> {
    request.query_value(key).and_then(|v| v.parse().ok())
}

fn body_i64(body: &Value, key: &str) -> i64 {
    body.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn body_str<'a>(body: &'a Value, key: &str) -> &'a str {
    body.get(key).and_then(Value::as_str).unwrap_or("")
}

/// 完整 URL 中的路径部分
fn url_path(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
}

impl FakeDrive {
    fn list_v2(s: &mut State, request: &ApiRequest) -> PanResult<RawResponse> {
        let parent = query_i64(request, "parentFileId").unwrap_or(ROOT_ID);
        if let Some(failure) = s.list_failure(parent) {
            return failure.respond();
        }

        let limit = query_i64(request, "limit").unwrap_or(100).max(1) as usize;
        let keyword = request.query_value("searchData").map(str::to_string);
        let children: Vec<&Node> = s
            .children(parent)
            .into_iter()
            .filter(|n| keyword.as_deref().map_or(true, |k| n.name.contains(k)))
            .collect();

        let start = match query_i64(request, "lastFileId") {
            None => 0,
            Some(cursor) => match children.iter().position(|n| n.id == cursor) {
                Some(pos) => pos + 1,
                None => children.len(),
            },
        };
        let end = (start + limit).min(children.len());
        let page = &children[start.min(end)..end];
        let last_file_id = if end >= children.len() {
            -1
        } else {
            page.last().map(|n| n.id).unwrap_or(-1)
        };

        Ok(ok(json!({
            "lastFileId": last_file_id,
            "fileList": page.iter().map(|n| file_json(n, "fileId")).collect::<Vec<_>>(),
        })))
    }

    fn list_v1(s: &mut State, request: &ApiRequest) -> PanResult<RawResponse> {
        let parent = query_i64(request, "parentFileId").unwrap_or(ROOT_ID);
        if let Some(failure) = s.list_failure(parent) {
            return failure.respond();
        }

        let page = query_i64(request, "page").unwrap_or(1).max(1) as usize;
        let limit = query_i64(request, "limit").unwrap_or(100).max(1) as usize;
        let children: Vec<&Node> = s
            .children(parent)
            .into_iter()
            .filter(|n| !n.trashed)
            .collect();

        let start = ((page - 1) * limit).min(children.len());
        let end = (start + limit).min(children.len());
        Ok(ok(json!({
            "total": children.len(),
            "fileList": children[start..end].iter().map(|n| file_json(n, "fileID")).collect::<Vec<_>>(),
        })))
    }

    fn mkdir(s: &mut State, body: &Value) -> PanResult<RawResponse> {
        let id = s.alloc_id();
        let parent = body_i64(body, "parentID");
        s.push_node(id, parent, body_str(body, "name"), true, Vec::new());
        Ok(ok(json!({ "dirID": id })))
    }

    fn create(s: &mut State, body: &Value) -> PanResult<RawResponse> {
        if let Some(failure) = s.create_failures.pop_front() {
            return failure.respond();
        }
        let filename = body_str(body, "filename").to_string();
        if s.failing_upload(&filename) {
            return FakeFailure::Network.respond();
        }

        let etag = body_str(body, "etag").to_ascii_lowercase();
        let size = body.get("size").and_then(Value::as_u64).unwrap_or(0);
        let duplicate = body_i64(body, "duplicate") as u8;
        let contain_dir = body.get("containDir").and_then(Value::as_bool).unwrap_or(false);
        let (parent, name) = s.prepare_parent(body_i64(body, "parentFileID"), &filename, contain_dir);

        if let Some(content) = s.content_by_etag(&etag) {
            let id = s.place_file(parent, &name, duplicate, content);
            return Ok(ok(json!({ "fileID": id, "reuse": true, "preuploadID": "" })));
        }

        s.next_preupload += 1;
        let preupload_id = format!("pre-{}", s.next_preupload);
        let slice_size = s.slice_size;
        let verify_left = s.verify_polls;
        s.uploads.insert(
            preupload_id.clone(),
            PendingUpload {
                parent,
                name,
                duplicate,
                etag,
                size,
                slice_size,
                slices: BTreeMap::new(),
                verify_left,
            },
        );
        Ok(ok(json!({
            "fileID": 0,
            "reuse": false,
            "preuploadID": preupload_id,
            "sliceSize": slice_size,
            "servers": [UPLOAD_SERVER],
        })))
    }

    fn upload_complete(s: &mut State, body: &Value) -> PanResult<RawResponse> {
        let preupload_id = body_str(body, "preuploadID").to_string();
        let Some(upload) = s.uploads.get_mut(&preupload_id) else {
            return Ok(api_error(1, "preuploadID 不存在"));
        };
        if upload.verify_left > 0 {
            upload.verify_left -= 1;
            return Ok(api_error(CODE_VERIFYING, "文件校验中"));
        }

        let expected = upload.size.div_ceil(upload.slice_size) as usize;
        if upload.slices.len() != expected {
            return Ok(api_error(1, "分片不完整"));
        }
        let content: Vec<u8> = upload.slices.values().flatten().copied().collect();
        if md5_hex(&content) != upload.etag {
            return Ok(api_error(1, "文件 MD5 不一致"));
        }

        let (parent, name, duplicate) = (upload.parent, upload.name.clone(), upload.duplicate);
        s.uploads.remove(&preupload_id);
        let id = s.place_file(parent, &name, duplicate, content);
        Ok(ok(json!({ "completed": true, "fileID": id })))
    }

    fn upload_slice(s: &mut State, upload: &MultipartUpload) -> PanResult<RawResponse> {
        let slice_no: u32 = upload.field("sliceNo").and_then(|v| v.parse().ok()).unwrap_or(0);
        if s.failing_slices.contains(&slice_no) {
            return FakeFailure::Network.respond();
        }
        if upload.field("sliceMD5") != Some(md5_hex(&upload.data).as_str()) {
            return Ok(api_error(1, "分片 MD5 不一致"));
        }
        let preupload_id = upload.field("preuploadID").unwrap_or("").to_string();
        let Some(pending) = s.uploads.get_mut(&preupload_id) else {
            return Ok(api_error(1, "preuploadID 不存在"));
        };
        pending.slices.insert(slice_no, upload.data.clone());
        s.slice_uploads += 1;
        Ok(ok(Value::Null))
    }

    fn single_create(s: &mut State, upload: &MultipartUpload) -> PanResult<RawResponse> {
        let filename = upload.field("filename").unwrap_or("").to_string();
        if s.failing_upload(&filename) {
            return FakeFailure::Network.respond();
        }
        let etag = upload.field("etag").unwrap_or("").to_ascii_lowercase();
        if md5_hex(&upload.data) != etag {
            return Ok(api_error(1, "文件 MD5 不一致"));
        }

        let parent: i64 = upload.field("parentFileID").and_then(|v| v.parse().ok()).unwrap_or(0);
        let duplicate: u8 = upload.field("duplicate").and_then(|v| v.parse().ok()).unwrap_or(1);
        let contain_dir = upload.field("containDir") == Some("true");
        let reuse = s.content_by_etag(&etag).is_some();

        let (parent, name) = s.prepare_parent(parent, &filename, contain_dir);
        let id = s.place_file(parent, &name, duplicate, upload.data.clone());
        Ok(ok(json!({ "fileID": id, "completed": true, "reuse": reuse })))
    }

    fn image_create(s: &mut State, body: &Value) -> PanResult<RawResponse> {
        let etag = body_str(body, "etag").to_ascii_lowercase();
        let name = body_str(body, "filename").to_string();
        let parent = body_str(body, "parentFileID").to_string();
        let size = body.get("size").and_then(Value::as_u64).unwrap_or(0);

        if let Some(existing) = s.images.iter().find(|n| n.etag == etag) {
            return Ok(ok(json!({ "fileID": existing.id, "reuse": true, "preuploadID": "" })));
        }

        s.next_preupload += 1;
        let preupload_id = format!("img-pre-{}", s.next_preupload);
        let async_left = s.image_async_polls;
        s.image_uploads.insert(
            preupload_id.clone(),
            PendingImage {
                parent,
                name,
                etag,
                size,
                slices: BTreeMap::new(),
                async_left,
            },
        );
        Ok(ok(json!({
            "fileID": "",
            "reuse": false,
            "preuploadID": preupload_id,
            "sliceSize": s.slice_size,
        })))
    }

    fn image_upload_url(s: &mut State, body: &Value) -> PanResult<RawResponse> {
        let preupload_id = body_str(body, "preuploadID");
        let slice_no = body.get("sliceNo").and_then(Value::as_u64).unwrap_or(0);
        if !s.image_uploads.contains_key(preupload_id) {
            return Ok(api_error(1, "preuploadID 不存在"));
        }
        Ok(ok(json!({
            "presignedURL": format!("{}/oss-put/{}/{}", UPLOAD_SERVER, preupload_id, slice_no)
        })))
    }

    /// 分片齐全且 MD5 一致时落盘，返回文件ID
    fn finish_image(s: &mut State, preupload_id: &str) -> Result<String, &'static str> {
        let Some(upload) = s.image_uploads.get(preupload_id) else {
            return Err("preuploadID 不存在");
        };
        let expected = upload.size.div_ceil(s.slice_size) as usize;
        if upload.slices.len() != expected {
            return Err("分片不完整");
        }
        let content: Vec<u8> = upload.slices.values().flatten().copied().collect();
        if md5_hex(&content) != upload.etag {
            return Err("文件 MD5 不一致");
        }
        let (parent, name, etag) = (upload.parent.clone(), upload.name.clone(), upload.etag.clone());
        s.image_uploads.remove(preupload_id);
        let id = s.alloc_image_id();
        s.images.push(ImageNode {
            id: id.clone(),
            name,
            parent,
            content,
            etag,
        });
        Ok(id)
    }

    fn image_complete(s: &mut State, body: &Value) -> PanResult<RawResponse> {
        let preupload_id = body_str(body, "preuploadID").to_string();
        let Some(upload) = s.image_uploads.get(&preupload_id) else {
            return Ok(api_error(1, "preuploadID 不存在"));
        };
        if upload.async_left > 0 {
            return Ok(ok(json!({ "async": true, "completed": false, "fileID": "" })));
        }
        match Self::finish_image(s, &preupload_id) {
            Ok(id) => Ok(ok(json!({ "async": false, "completed": true, "fileID": id }))),
            Err(reason) => Ok(api_error(1, reason)),
        }
    }

    fn image_async_result(s: &mut State, body: &Value) -> PanResult<RawResponse> {
        let preupload_id = body_str(body, "preuploadID").to_string();
        let Some(upload) = s.image_uploads.get_mut(&preupload_id) else {
            return Ok(api_error(1, "preuploadID 不存在"));
        };
        if upload.async_left > 0 {
            upload.async_left -= 1;
            return Ok(ok(json!({ "completed": false, "fileID": "" })));
        }
        match Self::finish_image(s, &preupload_id) {
            Ok(id) => Ok(ok(json!({ "completed": true, "fileID": id }))),
            Err(reason) => Ok(api_error(1, reason)),
        }
    }

    fn image_detail(s: &mut State, request: &ApiRequest) -> PanResult<RawResponse> {
        let id = request.query_value("fileID").unwrap_or("");
        match s.images.iter().find(|n| n.id == id) {
            Some(node) => Ok(ok(json!({
                "fileId": node.id,
                "filename": node.name,
                "type": 0,
                "size": node.content.len(),
                "etag": node.etag,
                "parentFileId": node.parent,
            }))),
            None => Ok(api_error(5066, "文件不存在")),
        }
    }

    fn download_info(s: &mut State, request: &ApiRequest) -> PanResult<RawResponse> {
        let id = query_i64(request, "fileId").unwrap_or(0);
        match s.node(id) {
            Some(node) if !node.is_dir => Ok(ok(json!({
                "downloadUrl": format!("{}/file/{}", DOWNLOAD_HOST, id)
            }))),
            _ => Ok(api_error(5066, "文件不存在")),
        }
    }
}

#[async_trait]
impl ApiTransport for FakeDrive {
    async fn send(&self, request: ApiRequest) -> PanResult<RawResponse> {
        tokio::task::yield_now().await;
        let mut s = self.state.lock();
        s.calls.push(request.path.clone());

        let body = request.body.clone().unwrap_or(Value::Null);
        match request.path.as_str() {
            "/api/v2/file/list" => Self::list_v2(&mut s, &request),
            "/api/v1/file/list" => Self::list_v1(&mut s, &request),
            "/upload/v1/file/mkdir" => Self::mkdir(&mut s, &body),
            "/upload/v2/file/create" => Self::create(&mut s, &body),
            "/upload/v2/file/upload_complete" => Self::upload_complete(&mut s, &body),
            "/upload/v2/file/domain" => Ok(ok(json!([UPLOAD_SERVER]))),
            "/api/v1/file/download_info" => Self::download_info(&mut s, &request),
            "/upload/v1/oss/file/create" => Self::image_create(&mut s, &body),
            "/upload/v1/oss/file/get_upload_url" => Self::image_upload_url(&mut s, &body),
            "/upload/v1/oss/file/upload_complete" => Self::image_complete(&mut s, &body),
            "/upload/v1/oss/file/upload_async_result" => Self::image_async_result(&mut s, &body),
            "/api/v1/oss/file/detail" => Self::image_detail(&mut s, &request),
            other => Ok(api_error(1, &format!("fake drive 不支持 {}", other))),
        }
    }

    async fn send_multipart(&self, url: &str, upload: MultipartUpload) -> PanResult<RawResponse> {
        tokio::task::yield_now().await;
        let mut s = self.state.lock();
        let path = url_path(url).to_string();
        s.calls.push(path.clone());

        match path.as_str() {
            "/upload/v2/file/slice" => Self::upload_slice(&mut s, &upload),
            "/upload/v2/file/single/create" => Self::single_create(&mut s, &upload),
            other => Ok(api_error(1, &format!("fake drive 不支持 {}", other))),
        }
    }

    async fn put_bytes(&self, url: &str, data: Vec<u8>) -> PanResult<RawResponse> {
        tokio::task::yield_now().await;
        let mut s = self.state.lock();
        s.calls.push("/oss-put".to_string());

        // {UPLOAD_SERVER}/oss-put/{preuploadID}/{sliceNo}
        let mut parts = url_path(url).trim_start_matches('/').split('/').skip(1);
        let preupload_id = parts.next().unwrap_or("").to_string();
        let slice_no: u32 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        let Some(pending) = s.image_uploads.get_mut(&preupload_id) else {
            return Ok(RawResponse {
                status: 403,
                body: "signature expired".to_string(),
            });
        };
        pending.slices.insert(slice_no, data);
        s.image_puts += 1;
        Ok(RawResponse::ok(""))
    }

    async fn download_to(&self, url: &str, dest: &Path) -> PanResult<u64> {
        tokio::task::yield_now().await;
        let content = {
            let mut s = self.state.lock();
            s.calls.push("/download".to_string());

            let id: i64 = url
                .rsplit('/')
                .next()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if let Some(left) = s.download_failures.get_mut(&id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(PanError::Network("download interrupted by fake".to_string()));
                }
            }
            let mut content = match s.node(id) {
                Some(node) => node.content.clone(),
                None => {
                    return Err(PanError::Http {
                        status: 404,
                        body: "not found".to_string(),
                    })
                }
            };
            if let Some(left) = s.corrupt.get_mut(&id) {
                if *left > 0 {
                    *left -= 1;
                    if let Some(first) = content.first_mut() {
                        *first ^= 0xFF;
                    }
                }
            }
            content
        };

        tokio::fs::write(dest, &content).await?;
        Ok(content.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_path() {
        assert_eq!(url_path("https://a.b/upload/v2/file/slice"), "/upload/v2/file/slice");
        assert_eq!(url_path("https://a.b"), "/");
    }

    #[test]
    fn test_keep_both_renames() {
        let drive = FakeDrive::new();
        let mut s = drive.state.lock();
        let a = s.place_file(0, "a.txt", 1, b"1".to_vec());
        let b = s.place_file(0, "a.txt", 1, b"2".to_vec());
        let c = s.place_file(0, "noext", 1, b"3".to_vec());
        let d = s.place_file(0, "noext", 1, b"4".to_vec());
        assert_eq!(s.node(a).unwrap().name, "a.txt");
        assert_eq!(s.node(b).unwrap().name, "a(1).txt");
        assert_eq!(s.node(c).unwrap().name, "noext");
        assert_eq!(s.node(d).unwrap().name, "noext(1)");
    }
}
