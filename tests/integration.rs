//! End-to-end scenarios mirroring the eight literal cases and the boundary
//! behaviors from the testable-properties list: unique-index hits,
//! normal-index-plus-post-filter, union-index hits and conflicts, IN-list
//! multi-column lookups, sort+limit, duplicate-predicate rejection,
//! truncate, and concurrent unique-conflict inserts.

use std::sync::{Arc, Barrier, Once};
use std::thread;

use strata::{Condition, Database, FieldDescriptor, FieldType, IndexKind, MemoryEngine, Row, StrataError, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static INIT_TRACING: Once = Once::new();

fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

#[derive(Debug, Clone, Default)]
struct Person {
    id: u64,
    name: String,
    phone: String,
    age: u32,
    birthday: String,
    gender: String,
}

const PERSON_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor { name: "Id", position: 0, field_type: FieldType::U64, index_kind: IndexKind::None },
    FieldDescriptor { name: "Name", position: 1, field_type: FieldType::Str, index_kind: IndexKind::Normal },
    FieldDescriptor { name: "Phone", position: 2, field_type: FieldType::Str, index_kind: IndexKind::Unique },
    FieldDescriptor { name: "Age", position: 3, field_type: FieldType::U32, index_kind: IndexKind::Normal },
    FieldDescriptor { name: "BirthDay", position: 4, field_type: FieldType::Str, index_kind: IndexKind::None },
    FieldDescriptor { name: "Gender", position: 5, field_type: FieldType::Str, index_kind: IndexKind::None },
];

impl Row for Person {
    fn table_name(&self) -> &'static str {
        "Person"
    }

    fn marshal(&self) -> strata::Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.id.to_be_bytes());
        write_str(&mut buf, &self.name);
        write_str(&mut buf, &self.phone);
        buf.extend_from_slice(&self.age.to_be_bytes());
        write_str(&mut buf, &self.birthday);
        write_str(&mut buf, &self.gender);
        Ok(buf)
    }

    fn unmarshal(&mut self, bytes: &[u8]) -> strata::Result<()> {
        let mut cur = bytes;
        self.id = read_u64(&mut cur);
        self.name = read_str(&mut cur);
        self.phone = read_str(&mut cur);
        self.age = read_u32(&mut cur);
        self.birthday = read_str(&mut cur);
        self.gender = read_str(&mut cur);
        Ok(())
    }

    fn clone_empty(&self) -> Box<dyn Row> {
        Box::new(Person::default())
    }

    fn fields(&self) -> &'static [FieldDescriptor] {
        PERSON_FIELDS
    }

    fn field_value(&self, position: usize) -> Value {
        match position {
            0 => Value::U64(self.id),
            1 => Value::Str(self.name.clone()),
            2 => Value::Str(self.phone.clone()),
            3 => Value::U32(self.age),
            4 => Value::Str(self.birthday.clone()),
            5 => Value::Str(self.gender.clone()),
            _ => unreachable!(),
        }
    }

    fn set_row_id(&mut self, id: u64) {
        self.id = id;
    }
}

#[derive(Debug, Clone, Default)]
struct AccountInfo {
    id: u64,
    account_channel: String,
    aaid: u64,
}

const ACCOUNT_FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor { name: "Id", position: 0, field_type: FieldType::U64, index_kind: IndexKind::None },
    FieldDescriptor { name: "AccountChannel", position: 1, field_type: FieldType::Str, index_kind: IndexKind::Union },
    FieldDescriptor { name: "Aaid", position: 2, field_type: FieldType::U64, index_kind: IndexKind::Union },
];

impl Row for AccountInfo {
    fn table_name(&self) -> &'static str {
        "AccountInfo"
    }

    fn marshal(&self) -> strata::Result<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.id.to_be_bytes());
        write_str(&mut buf, &self.account_channel);
        buf.extend_from_slice(&self.aaid.to_be_bytes());
        Ok(buf)
    }

    fn unmarshal(&mut self, bytes: &[u8]) -> strata::Result<()> {
        let mut cur = bytes;
        self.id = read_u64(&mut cur);
        self.account_channel = read_str(&mut cur);
        self.aaid = read_u64(&mut cur);
        Ok(())
    }

    fn clone_empty(&self) -> Box<dyn Row> {
        Box::new(AccountInfo::default())
    }

    fn fields(&self) -> &'static [FieldDescriptor] {
        ACCOUNT_FIELDS
    }

    fn field_value(&self, position: usize) -> Value {
        match position {
            0 => Value::U64(self.id),
            1 => Value::Str(self.account_channel.clone()),
            2 => Value::U64(self.aaid),
            _ => unreachable!(),
        }
    }

    fn set_row_id(&mut self, id: u64) {
        self.id = id;
    }
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn read_u64(cur: &mut &[u8]) -> u64 {
    let (head, tail) = cur.split_at(8);
    *cur = tail;
    u64::from_be_bytes(head.try_into().unwrap())
}

fn read_u32(cur: &mut &[u8]) -> u32 {
    let (head, tail) = cur.split_at(4);
    *cur = tail;
    u32::from_be_bytes(head.try_into().unwrap())
}

fn read_str(cur: &mut &[u8]) -> String {
    let len = read_u32(cur) as usize;
    let (head, tail) = cur.split_at(len);
    *cur = tail;
    String::from_utf8_lossy(head).into_owned()
}

fn new_db() -> Database {
    init_tracing();
    Database::new(Arc::new(MemoryEngine::new()))
}

fn seed_people(db: &Database) {
    db.create_table(&Person::default()).unwrap();
    for i in 0..10u32 {
        let mut p = Person {
            id: 0,
            name: "jacky".into(),
            phone: format!("+86{i}"),
            age: 10 + i,
            birthday: "2000-01-01".into(),
            gender: "m".into(),
        };
        db.insert(&mut p).unwrap();
    }
}

fn seed_accounts(db: &Database) {
    db.create_table(&AccountInfo::default()).unwrap();
    for i in 0..10u64 {
        let mut a = AccountInfo {
            id: 0,
            account_channel: "lb".into(),
            aaid: 10000 + i,
        };
        db.insert(&mut a).unwrap();
    }
}

#[test]
fn scenario_1_unique_index_hit() {
    let db = new_db();
    seed_people(&db);

    let cond = Condition::new(&Person::default()).eq("Phone", Value::Str("+865".into()));
    let rows = db.find(&cond).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].row_id(), 6);
}

#[test]
fn scenario_2_normal_index_plus_post_filter() {
    let db = new_db();
    seed_people(&db);

    let cond = Condition::new(&Person::default())
        .eq("Name", Value::Str("jacky".into()))
        .eq("Age", Value::U32(15));
    let rows = db.find(&cond).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].row_id(), 6);
}

#[test]
fn scenario_3_union_index_hit_and_conflict() {
    let db = new_db();
    seed_accounts(&db);

    let cond = Condition::new(&AccountInfo::default())
        .eq("Aaid", Value::U64(10005))
        .eq("AccountChannel", Value::Str("lb".into()));
    let rows = db.find(&cond).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].row_id(), 6);

    let mut dup = AccountInfo {
        id: 0,
        account_channel: "lb".into(),
        aaid: 10005,
    };
    let err = db.insert(&mut dup).unwrap_err();
    assert!(matches!(err, StrataError::IdxUniqueConflict { .. }));
}

#[test]
fn scenario_4_in_list_multi_column() {
    let db = new_db();
    seed_accounts(&db);

    let cond = Condition::new(&AccountInfo::default()).in_list(
        vec!["AccountChannel", "Aaid"],
        vec![
            vec![Value::Str("lb".into()), Value::U64(10005)],
            vec![Value::Str("lb".into()), Value::U64(10006)],
        ],
    );
    let rows = db.find(&cond).unwrap();
    let mut ids: Vec<u64> = rows.iter().map(|r| r.row_id()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![6, 7]);
}

#[test]
fn scenario_5_sort_and_limit() {
    let db = new_db();
    seed_accounts(&db);

    let cond = Condition::new(&AccountInfo::default())
        .eq("AccountChannel", Value::Str("lb".into()))
        .sort_by(vec!["Aaid", "AccountChannel"], true)
        .limit(5);
    let rows = db.find(&cond).unwrap();
    let ids: Vec<u64> = rows.iter().map(|r| r.row_id()).collect();
    assert_eq!(ids, vec![10, 9, 8, 7, 6]);
}

#[test]
fn scenario_6_duplicate_equality_predicate_is_invalid() {
    let db = new_db();
    seed_accounts(&db);

    let cond = Condition::new(&AccountInfo::default())
        .eq("Aaid", Value::U64(10005))
        .eq("Aaid", Value::U64(10005));
    let err = db.find(&cond).unwrap_err();
    assert!(matches!(err, StrataError::QueryInvalid(_)));
}

#[test]
fn scenario_7_truncate_invariant() {
    let db = new_db();
    db.create_table(&Person::default()).unwrap();
    for i in 0..1000u32 {
        let mut p = Person {
            id: 0,
            name: format!("n{i}"),
            phone: format!("+{i}"),
            age: i,
            birthday: String::new(),
            gender: String::new(),
        };
        db.insert(&mut p).unwrap();
    }
    db.truncate(&Person::default()).unwrap();

    let report = db.snoop(&Person::default()).unwrap();
    assert_eq!(report.total_count, 0);
    assert!(report.unique_index.values().all(|&c| c == 0));
    assert!(report.normal_index.values().all(|&c| c == 0));
}

#[test]
fn scenario_8_concurrent_unique_conflict() {
    let db = new_db();
    db.create_table(&Person::default()).unwrap();
    let db = Arc::new(db);
    let barrier = Arc::new(Barrier::new(3));

    let mut handles = Vec::new();
    for task in 0..3u32 {
        let db = db.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..10u32 {
                let mut p = Person {
                    id: 0,
                    name: format!("task{task}-{i}"),
                    phone: format!("+{i}"),
                    age: i,
                    birthday: String::new(),
                    gender: String::new(),
                };
                let _ = db.insert(&mut p);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(db.count(&Person::default()).unwrap(), 10);
}

#[test]
fn row_id_zero_as_delete_target_is_illegal() {
    let db = new_db();
    db.create_table(&Person::default()).unwrap();
    let unsaved = Person::default();
    let err = db.delete(&unsaved).unwrap_err();
    assert!(matches!(err, StrataError::RowIdIllegal));
}

#[test]
fn first_field_not_id_u64_is_rejected() {
    #[derive(Debug)]
    struct BadRow;
    const BAD_FIELDS: &[FieldDescriptor] = &[FieldDescriptor {
        name: "Name",
        position: 0,
        field_type: FieldType::Str,
        index_kind: IndexKind::None,
    }];
    impl Row for BadRow {
        fn table_name(&self) -> &'static str {
            "Bad"
        }
        fn marshal(&self) -> strata::Result<Vec<u8>> {
            Ok(vec![])
        }
        fn unmarshal(&mut self, _bytes: &[u8]) -> strata::Result<()> {
            Ok(())
        }
        fn clone_empty(&self) -> Box<dyn Row> {
            Box::new(BadRow)
        }
        fn fields(&self) -> &'static [FieldDescriptor] {
            BAD_FIELDS
        }
        fn field_value(&self, _position: usize) -> Value {
            Value::Str(String::new())
        }
        fn set_row_id(&mut self, _id: u64) {}
    }

    let db = new_db();
    let err = db.create_table(&BadRow).unwrap_err();
    assert!(matches!(err, StrataError::RowIdIllegal));
}

#[test]
fn find_with_no_predicates_scans_all() {
    let db = new_db();
    seed_people(&db);
    let cond = Condition::new(&Person::default());
    let rows = db.find(&cond).unwrap();
    assert_eq!(rows.len(), 10);
}

#[test]
fn in_list_arity_mismatch_is_query_invalid() {
    let db = new_db();
    seed_accounts(&db);

    let cond = Condition::new(&AccountInfo::default()).in_list(
        vec!["AccountChannel", "Aaid"],
        vec![vec![Value::Str("lb".into())]],
    );
    let err = db.find(&cond).unwrap_err();
    assert!(matches!(err, StrataError::QueryInvalid(_)));
}

#[test]
fn last_with_default_sort_returns_highest_primary_key() {
    let db = new_db();
    seed_people(&db);
    let cond = Condition::new(&Person::default());
    let row = db.last(cond).unwrap();
    assert_eq!(row.row_id(), 10);
}
