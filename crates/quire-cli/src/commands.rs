use std::path::Path;
use std::sync::Arc;

use cid::Cid;
use miette::{IntoDiagnostic, Result, miette};
use quire_repo::codec::parse_cid;
use quire_repo::repo::{
    CommitMeta, CreateRecordRequest, DeleteRecordRequest, GetRecordRequest, ListRecordsRequest,
    PutRecordRequest,
};
use quire_repo::value::convert::{from_json_str, to_json};
use quire_repo::{BlockStore, Commit, FileBlockStore, RepoService, Value};
use serde_json::json;

use crate::cli::Command;
use crate::config::Config;
use crate::keys;

type Repo = RepoService<FileBlockStore, k256::ecdsa::SigningKey>;

pub async fn run(config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Init => init(config).await,
        Command::Import { input, no_verify } => import(config, &input, no_verify).await,
        command => {
            let repo = open(config).await?;
            dispatch(&repo, command).await
        }
    }
}

async fn dispatch(repo: &Repo, command: Command) -> Result<()> {
    match command {
        Command::Status => {
            let head = repo.head()?;
            print(json!({
                "did": repo.did(),
                "publicKey": repo.public_key().encode(),
                "version": head.version(),
                "rev": head.rev().map(|r| r.to_string()),
                "commit": head.commit_cid().map(|c| c.to_string()),
                "root": head.root.to_string(),
            }))
        }
        Command::Create {
            collection,
            record,
            rkey,
            swap_commit,
            no_validate,
        } => {
            let out = repo
                .create_record(
                    CreateRecordRequest::new()
                        .collection(collection)
                        .record(read_record(&record).await?)
                        .maybe_rkey(rkey)
                        .maybe_swap_commit(cid_arg(swap_commit)?)
                        .maybe_validate(no_validate.then_some(false))
                        .build(),
                )
                .await?;
            print(json!({
                "rkey": out.rkey.as_str(),
                "cid": out.cid.to_string(),
                "validationStatus": out.validation_status,
                "commit": out.commit.as_ref().map(commit_json),
            }))
        }
        Command::Put {
            collection,
            rkey,
            record,
            swap_commit,
            swap_record,
            no_validate,
        } => {
            let out = repo
                .put_record(
                    PutRecordRequest::new()
                        .collection(collection)
                        .rkey(rkey)
                        .record(read_record(&record).await?)
                        .maybe_swap_commit(cid_arg(swap_commit)?)
                        .maybe_swap_record(cid_arg(swap_record)?)
                        .maybe_validate(no_validate.then_some(false))
                        .build(),
                )
                .await?;
            print(json!({
                "cid": out.cid.to_string(),
                "validationStatus": out.validation_status,
                "commit": out.commit.as_ref().map(commit_json),
            }))
        }
        Command::Get { collection, rkey, at } => {
            let out = repo
                .get_record(
                    GetRecordRequest::new()
                        .collection(collection)
                        .rkey(rkey)
                        .maybe_cid(cid_arg(at)?)
                        .build(),
                )
                .await?;
            print(json!({
                "cid": out.cid.to_string(),
                "value": to_json(&out.value)?,
            }))
        }
        Command::Delete {
            collection,
            rkey,
            swap_commit,
            swap_record,
        } => {
            let out = repo
                .delete_record(
                    DeleteRecordRequest::new()
                        .collection(collection)
                        .rkey(rkey)
                        .maybe_swap_commit(cid_arg(swap_commit)?)
                        .maybe_swap_record(cid_arg(swap_record)?)
                        .build(),
                )
                .await?;
            print(json!({ "commit": commit_json(&out.commit) }))
        }
        Command::List {
            collection,
            limit,
            cursor,
            start,
            end,
            reverse,
        } => {
            let page = repo
                .list_records(
                    ListRecordsRequest::new()
                        .collection(collection)
                        .maybe_limit(limit)
                        .maybe_cursor(cursor)
                        .maybe_rkey_start(start)
                        .maybe_rkey_end(end)
                        .reverse(reverse)
                        .build(),
                )
                .await?;
            let mut records = Vec::with_capacity(page.records.len());
            for record in &page.records {
                records.push(json!({
                    "rkey": record.rkey.as_str(),
                    "cid": record.cid.to_string(),
                    "value": to_json(&record.value)?,
                }));
            }
            print(json!({
                "records": records,
                "cursor": page.cursor.as_deref(),
            }))
        }
        Command::Collections => {
            let collections = repo.list_collections().await?;
            let names: Vec<&str> = collections.iter().map(|c| c.as_str()).collect();
            print(json!({ "collections": names }))
        }
        Command::Log { limit } => {
            let log = repo.commit_log(limit).await?;
            let commits: Vec<_> = log
                .iter()
                .map(|entry| {
                    json!({
                        "cid": entry.cid.to_string(),
                        "version": entry.commit.version,
                        "rev": entry.commit.rev.to_string(),
                        "data": entry.commit.data.to_string(),
                        "prev": entry.commit.prev.map(|p| p.to_string()),
                    })
                })
                .collect();
            print(json!({ "commits": commits }))
        }
        Command::Export { output } => {
            let bytes = repo.export_car().await?;
            tokio::fs::write(&output, &bytes).await.into_diagnostic()?;
            print(json!({
                "path": output.display().to_string(),
                "bytes": bytes.len(),
                "commit": repo.current_commit_cid()?.map(|c| c.to_string()),
            }))
        }
        Command::Init | Command::Import { .. } => {
            Err(miette!("init and import run before a repository is opened"))
        }
    }
}

async fn init(config: &Config) -> Result<()> {
    if let Some(parent) = config.repo.store.parent() {
        tokio::fs::create_dir_all(parent).await.into_diagnostic()?;
    }
    let store = Arc::new(FileBlockStore::open(&config.repo.store).await?);
    if !store.roots()?.is_empty() {
        return Err(miette!(
            "A repository already exists at {}",
            config.repo.store.display()
        ));
    }

    let key = keys::generate(&config.repo.key).await?;
    let repo = RepoService::new(store.clone(), key, config.repo.did.as_str());
    repo.initialize().await?;
    let root = repo.current_root()?;
    store.set_roots(vec![root])?;
    store.flush().await?;

    print(json!({
        "did": repo.did(),
        "publicKey": repo.public_key().encode(),
        "root": root.to_string(),
    }))
}

async fn import(config: &Config, input: &Path, no_verify: bool) -> Result<()> {
    let store = Arc::new(FileBlockStore::open(&config.repo.store).await?);
    if !store.roots()?.is_empty() {
        return Err(miette!(
            help = "import only loads into an empty store",
            "A repository already exists at {}",
            config.repo.store.display()
        ));
    }

    let key = keys::load(&config.repo.key).await?;
    let repo = RepoService::new(store.clone(), key, config.repo.did.as_str())
        .with_config(config.listing);
    let bytes = tokio::fs::read(input).await.into_diagnostic()?;
    let verify_key = (!no_verify).then(|| repo.public_key());
    repo.import_car(&bytes, verify_key.as_ref()).await?;

    let head = repo.head()?;
    if head.commit.is_none() {
        store.set_roots(vec![head.root])?;
        store.flush().await?;
    }
    print(json!({
        "version": head.version(),
        "commit": head.commit_cid().map(|c| c.to_string()),
        "root": head.root.to_string(),
    }))
}

/// Open the configured store at its head
///
/// A store rooted at a tree rather than a commit is still at genesis.
async fn open(config: &Config) -> Result<Repo> {
    let store = Arc::new(FileBlockStore::open(&config.repo.store).await?);
    let Some(root) = store.roots()?.first().copied() else {
        return Err(miette!(
            help = "run `quire init` first",
            "No repository at {}",
            config.repo.store.display()
        ));
    };
    let key = keys::load(&config.repo.key).await?;
    let did = config.repo.did.as_str();

    let block = store
        .get(&root)
        .await?
        .ok_or_else(|| miette!("Root block {} is missing from the store", root))?;
    let repo = if Commit::from_cbor(&block).is_ok() {
        RepoService::open(store, key, did, root).await?
    } else {
        let repo = RepoService::new(store, key, did);
        repo.initialize().await?;
        repo
    };
    Ok(repo.with_config(config.listing))
}

async fn read_record(arg: &str) -> Result<Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path).await.into_diagnostic()?,
        None => arg.to_string(),
    };
    Ok(from_json_str(&text)?)
}

fn cid_arg(arg: Option<String>) -> Result<Option<Cid>> {
    Ok(arg.as_deref().map(parse_cid).transpose()?)
}

fn commit_json(meta: &CommitMeta) -> serde_json::Value {
    json!({
        "cid": meta.cid.to_string(),
        "rev": meta.rev.to_string(),
        "version": meta.version,
    })
}

fn print(value: serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value).into_diagnostic()?);
    Ok(())
}
