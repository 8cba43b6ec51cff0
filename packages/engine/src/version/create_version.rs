use crate::sql::execution::conn::SqlConn;
use crate::sql::execution::postprocess::record_commit_ancestry;
use crate::sql::plan::CreateVersionPlan;
use crate::version::GLOBAL_VERSION_ID;
use crate::{LixError, Value};

#[derive(Debug, Clone, Default)]
pub struct CreateVersionArgs {
    pub id: Option<String>,
    pub name: Option<String>,
    pub inherits_from_version_id: Option<String>,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedVersion {
    pub id: String,
    pub name: String,
    pub inherits_from_version_id: Option<String>,
}

impl From<CreateVersionArgs> for CreateVersionPlan {
    fn from(args: CreateVersionArgs) -> Self {
        Self {
            id: args.id,
            name: args.name,
            inherits_from_version_id: args.inherits_from_version_id,
            hidden: args.hidden,
        }
    }
}

/// Creates a version row with its inheritance closure. The new version's tip
/// starts at the inherited version's tip, so its history is the parent's
/// history until the first own commit.
pub(crate) async fn create_version_in_conn(
    conn: &mut SqlConn<'_>,
    plan: &CreateVersionPlan,
    now: &str,
    generate_uuid: &mut dyn FnMut() -> String,
) -> Result<CreatedVersion, LixError> {
    let id = plan.id.clone().unwrap_or_else(|| generate_uuid());
    let name = plan.name.clone().unwrap_or_else(|| id.clone());
    let inherits_from_version_id = plan
        .inherits_from_version_id
        .clone()
        .unwrap_or_else(|| GLOBAL_VERSION_ID.to_string());

    let existing = conn
        .execute(
            "SELECT 1 FROM lix_internal_version WHERE id = $1",
            &[Value::Text(id.clone())],
        )
        .await?;
    if !existing.rows.is_empty() {
        return Err(LixError::planner(format!("version '{id}' already exists")));
    }

    let parent = conn
        .execute(
            "SELECT commit_id FROM lix_internal_version WHERE id = $1",
            &[Value::Text(inherits_from_version_id.clone())],
        )
        .await?;
    let Some(parent_row) = parent.rows.first() else {
        return Err(LixError::planner(format!(
            "unknown version '{inherits_from_version_id}' to inherit from"
        )));
    };
    let tip_commit_id = match parent_row.first() {
        Some(Value::Text(commit_id)) => commit_id.clone(),
        other => {
            return Err(LixError::invariant(format!(
                "version '{inherits_from_version_id}' has no tip commit: {other:?}"
            )))
        }
    };

    insert_version_row(
        conn,
        &VersionRowInsert {
            id: &id,
            name: &name,
            inherits_from_version_id: Some(&inherits_from_version_id),
            hidden: plan.hidden,
            commit_id: &tip_commit_id,
            working_commit_id: &generate_uuid(),
            working_change_set_id: &generate_uuid(),
            created_at: now,
        },
    )
    .await?;

    Ok(CreatedVersion {
        id,
        name,
        inherits_from_version_id: Some(inherits_from_version_id),
    })
}

pub(crate) struct VersionRowInsert<'a> {
    pub(crate) id: &'a str,
    pub(crate) name: &'a str,
    pub(crate) inherits_from_version_id: Option<&'a str>,
    pub(crate) hidden: bool,
    pub(crate) commit_id: &'a str,
    pub(crate) working_commit_id: &'a str,
    pub(crate) working_change_set_id: &'a str,
    pub(crate) created_at: &'a str,
}

pub(crate) async fn insert_version_row(
    conn: &mut SqlConn<'_>,
    row: &VersionRowInsert<'_>,
) -> Result<(), LixError> {
    conn.execute(
        "INSERT INTO lix_internal_version \
         (id, name, inherits_from_version_id, hidden, commit_id, working_commit_id, \
          working_change_set_id, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        &[
            Value::Text(row.id.to_string()),
            Value::Text(row.name.to_string()),
            match row.inherits_from_version_id {
                Some(parent) => Value::Text(parent.to_string()),
                None => Value::Null,
            },
            Value::Integer(i64::from(row.hidden)),
            Value::Text(row.commit_id.to_string()),
            Value::Text(row.working_commit_id.to_string()),
            Value::Text(row.working_change_set_id.to_string()),
            Value::Text(row.created_at.to_string()),
        ],
    )
    .await?;

    conn.execute(
        "INSERT INTO lix_internal_version_ancestry \
         (version_id, ancestor_version_id, inheritance_depth) VALUES ($1, $1, 0)",
        &[Value::Text(row.id.to_string())],
    )
    .await?;
    if let Some(parent) = row.inherits_from_version_id {
        conn.execute(
            "INSERT INTO lix_internal_version_ancestry \
             (version_id, ancestor_version_id, inheritance_depth) \
             SELECT $1, ancestor_version_id, inheritance_depth + 1 \
             FROM lix_internal_version_ancestry WHERE version_id = $2",
            &[
                Value::Text(row.id.to_string()),
                Value::Text(parent.to_string()),
            ],
        )
        .await?;
    }

    Ok(())
}

/// Seeds a root version (no inheritance) with an empty root commit.
pub(crate) async fn seed_root_version(
    conn: &mut SqlConn<'_>,
    id: &str,
    name: &str,
    hidden: bool,
    now: &str,
    generate_uuid: &mut dyn FnMut() -> String,
) -> Result<String, LixError> {
    let root_commit_id = generate_uuid();
    let root_change_set_id = generate_uuid();
    conn.execute(
        "INSERT INTO lix_internal_commit (id, version_id, change_set_id, author_ref, created_at) \
         VALUES ($1, $2, $3, NULL, $4)",
        &[
            Value::Text(root_commit_id.clone()),
            Value::Text(id.to_string()),
            Value::Text(root_change_set_id),
            Value::Text(now.to_string()),
        ],
    )
    .await?;
    record_commit_ancestry(conn, &root_commit_id, None).await?;

    insert_version_row(
        conn,
        &VersionRowInsert {
            id,
            name,
            inherits_from_version_id: None,
            hidden,
            commit_id: &root_commit_id,
            working_commit_id: &generate_uuid(),
            working_change_set_id: &generate_uuid(),
            created_at: now,
        },
    )
    .await?;

    Ok(root_commit_id)
}
