use std::collections::BTreeSet;
use std::sync::Arc;

use backoffice_api::auth::Role;
use backoffice_api::auth::principal::NewPrincipal;
use backoffice_api::store::{PgStore, PrincipalStore, StoreError};
use backoffice_api::test_support::{
    TestDatabase, TestDatabaseError, TestFixtures, TestRocketBuilder,
};
use rocket::http::{ContentType, Header, Status};
use rocket::serde::json::{Value, json};

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::NotConfigured) => {
            eprintln!("skipping postgres store test: TEST_DATABASE_URL not set");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

fn new_principal(username: &str, roles: &[Role]) -> NewPrincipal {
    NewPrincipal {
        username: username.to_string(),
        password_hash: "$argon2id$placeholder".to_string(),
        roles: roles.iter().copied().collect::<BTreeSet<_>>(),
    }
}

#[tokio::test]
async fn principal_lifecycle_round_trips_through_postgres() {
    let Some(db) = provision().await else {
        return;
    };
    let store = PgStore::new(db.pool().clone());

    let alice = store
        .create_principal(new_principal("alice", &[Role::Admin, Role::Moderator]))
        .await
        .expect("create alice");
    assert!(alice.is_admin());
    assert_eq!(alice.token_version, 0);

    let duplicate = store
        .create_principal(new_principal("alice", &[Role::Moderator]))
        .await;
    assert!(matches!(duplicate, Err(StoreError::Conflict(_))));

    let credential = store
        .find_credential_by_username("alice")
        .await
        .expect("lookup")
        .expect("credential");
    assert_eq!(credential.principal_id, alice.id);
    assert!(
        store
            .find_credential_by_username("ALICE")
            .await
            .expect("lookup")
            .is_none()
    );

    let demoted = store
        .replace_roles(alice.id, [Role::Moderator].into_iter().collect())
        .await
        .expect("demote");
    assert!(!demoted.is_admin());

    store
        .update_password_hash(alice.id, "$argon2id$other")
        .await
        .expect("password change");
    store
        .update_username(alice.id, "alice2")
        .await
        .expect("rename");
    let reloaded = store
        .find_principal_by_id(alice.id)
        .await
        .expect("reload")
        .expect("present");
    assert_eq!(reloaded.username, "alice2");
    assert_eq!(reloaded.token_version, 2);
    assert_eq!(
        reloaded.roles().iter().copied().collect::<Vec<_>>(),
        vec![Role::Moderator]
    );

    store.set_suspended(alice.id, true).await.expect("suspend");
    assert_eq!(store.list_principals(true).await.expect("list").len(), 1);
    assert!(store.list_principals(false).await.expect("list").is_empty());

    store.delete_principal(alice.id).await.expect("delete");
    assert!(matches!(
        store.delete_principal(alice.id).await,
        Err(StoreError::NotFound(_))
    ));
    let roles_left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_roles")
        .fetch_one(db.pool())
        .await
        .expect("count roles");
    assert_eq!(roles_left, 0);

    db.close().await.expect("drop test database");
}

#[tokio::test]
async fn listing_carries_every_principals_roles() {
    let Some(db) = provision().await else {
        return;
    };
    let store = PgStore::new(db.pool().clone());

    store
        .create_principal(new_principal("admin", &[Role::Admin, Role::Moderator]))
        .await
        .expect("create admin");
    store
        .create_principal(new_principal("mod", &[Role::Moderator]))
        .await
        .expect("create mod");
    store
        .create_principal(new_principal("nobody", &[]))
        .await
        .expect("create role-less");

    let listed = store.list_principals(false).await.expect("list");
    let mut roles: Vec<(String, Vec<Role>)> = listed
        .iter()
        .map(|p| (p.username.clone(), p.roles().iter().copied().collect()))
        .collect();
    roles.sort();
    assert_eq!(
        roles,
        vec![
            ("admin".to_string(), vec![Role::Admin, Role::Moderator]),
            ("mod".to_string(), vec![Role::Moderator]),
            ("nobody".to_string(), vec![]),
        ]
    );
    assert_eq!(listed.iter().filter(|p| p.is_admin()).count(), 1);

    db.close().await.expect("drop test database");
}

#[tokio::test]
async fn login_and_me_run_against_postgres() {
    let Some(db) = provision().await else {
        return;
    };
    let store: Arc<dyn PrincipalStore> = Arc::new(PgStore::new(db.pool().clone()));
    let (client, state) = TestRocketBuilder::new()
        .with_store(store)
        .async_client()
        .await;
    TestFixtures::new(&state)
        .insert_user("alice", "correct horse", &[Role::Moderator])
        .await;

    let response = client
        .post("/api/v1/auth/login")
        .header(ContentType::JSON)
        .body(json!({ "username": "alice", "password": "correct horse" }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("json body");
    let token = body["userInfo"]["token"].as_str().expect("token").to_string();

    let response = client
        .get("/api/v1/auth/me")
        .header(Header::new("Authorization", format!("Bearer {token}")))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body: Value = response.into_json().await.expect("json body");
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["roles"], json!(["moderator"]));

    drop(client);
    db.close().await.expect("drop test database");
}
