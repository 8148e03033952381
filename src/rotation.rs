use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Which half of the rotation cycle a class or student is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Rotation {
    A,
    B,
}

impl Rotation {
    pub fn flipped(self) -> Self {
        match self {
            Rotation::A => Rotation::B,
            Rotation::B => Rotation::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rotation::A => "A",
            Rotation::B => "B",
        }
    }

    /// Exact match only: lowercase or padded tokens are rejected.
    pub fn parse(raw: &str) -> Result<Self, SelectError> {
        match raw {
            "A" => Ok(Rotation::A),
            "B" => Ok(Rotation::B),
            other => Err(SelectError::InvalidRotationToken(other.to_string())),
        }
    }
}

impl FromStr for Rotation {
    type Err = SelectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rotation::parse(s)
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    #[error("no eligible students in class {class_id}")]
    NoEligibleStudents { class_id: String },
    #[error("invalid rotation token {0:?} (expected \"A\" or \"B\")")]
    InvalidRotationToken(String),
}

impl SelectError {
    pub fn code(&self) -> &'static str {
        match self {
            SelectError::NoEligibleStudents { .. } => "no_eligible_students",
            SelectError::InvalidRotationToken(_) => "invalid_rotation_token",
        }
    }
}

/// A student row as the roster provider hands it over, before token validation.
#[derive(Debug, Clone)]
pub struct RosterStudent {
    pub id: String,
    pub name: String,
    pub exclude: bool,
    pub rotation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub exclude: bool,
    pub rotation: Rotation,
}

impl Student {
    pub fn is_eligible(&self, active: Rotation) -> bool {
        !self.exclude && self.rotation == active
    }
}

/// One consistent snapshot of a class's rotation token and its full roster.
#[derive(Debug, Clone)]
pub struct Roster {
    class_id: String,
    rotation: Rotation,
    students: Vec<Student>,
}

impl Roster {
    pub fn new(
        class_id: impl Into<String>,
        class_rotation: &str,
        students: Vec<RosterStudent>,
    ) -> Result<Self, SelectError> {
        let rotation = Rotation::parse(class_rotation)?;
        let students = students
            .into_iter()
            .map(|s| -> Result<Student, SelectError> {
                Ok(Student {
                    rotation: Rotation::parse(&s.rotation)?,
                    id: s.id,
                    name: s.name,
                    exclude: s.exclude,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            class_id: class_id.into(),
            rotation,
            students,
        })
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }
}

/// Outcome of a successful pick. Nothing has been written yet: the caller
/// commits `student.rotation` and, when `class_flipped`, `class_rotation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pick {
    /// The winner in post-flip state.
    pub student: Student,
    /// Class token in effect after the pick.
    pub class_rotation: Rotation,
    pub class_flipped: bool,
}

fn eligible_under(roster: &Roster, active: Rotation) -> Vec<&Student> {
    roster
        .students
        .iter()
        .filter(|s| s.is_eligible(active))
        .collect()
}

/// Students that could be picked right now. Never flips anything.
pub fn list_eligible(roster: &Roster) -> Vec<&Student> {
    eligible_under(roster, roster.rotation)
}

/// Picks one eligible student uniformly at random.
///
/// When the active half is exhausted the class token is flipped once and the
/// same roster is re-filtered. If that half is empty too the pick fails and
/// the tentative flip is dropped with it, so a failed pick has nothing to
/// commit.
pub fn pick_one<R: Rng + ?Sized>(roster: &Roster, rng: &mut R) -> Result<Pick, SelectError> {
    let mut active = roster.rotation;
    let mut class_flipped = false;
    let mut eligible = eligible_under(roster, active);

    if eligible.is_empty() {
        active = active.flipped();
        class_flipped = true;
        eligible = eligible_under(roster, active);
    }
    if eligible.is_empty() {
        return Err(SelectError::NoEligibleStudents {
            class_id: roster.class_id.clone(),
        });
    }

    let idx = rng.random_range(0..eligible.len());
    let mut student = eligible[idx].clone();
    student.rotation = student.rotation.flipped();

    Ok(Pick {
        student,
        class_rotation: active,
        class_flipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn student(id: &str, rotation: &str, exclude: bool) -> RosterStudent {
        RosterStudent {
            id: id.to_string(),
            name: format!("Student {id}"),
            exclude,
            rotation: rotation.to_string(),
        }
    }

    fn roster(class_rotation: &str, students: Vec<RosterStudent>) -> Roster {
        Roster::new("class-1", class_rotation, students).expect("valid roster")
    }

    // Mirrors what the store does with a Pick: write back both tokens.
    fn commit(roster: &Roster, pick: &Pick) -> Roster {
        let mut next = roster.clone();
        next.rotation = pick.class_rotation;
        for s in next.students.iter_mut() {
            if s.id == pick.student.id {
                s.rotation = pick.student.rotation;
            }
        }
        next
    }

    fn ids(students: &[&Student]) -> HashSet<String> {
        students.iter().map(|s| s.id.clone()).collect()
    }

    #[test]
    fn parse_accepts_only_exact_tokens() {
        assert_eq!(Rotation::parse("A"), Ok(Rotation::A));
        assert_eq!(Rotation::parse("B"), Ok(Rotation::B));
        for bad in ["a", "b", "C", "", " A", "AB"] {
            assert_eq!(
                Rotation::parse(bad),
                Err(SelectError::InvalidRotationToken(bad.to_string()))
            );
        }
        assert_eq!(Rotation::A.flipped(), Rotation::B);
        assert_eq!(Rotation::B.flipped().flipped(), Rotation::B);
    }

    #[test]
    fn roster_rejects_malformed_tokens() {
        let err = Roster::new("c", "X", vec![]).unwrap_err();
        assert_eq!(err.code(), "invalid_rotation_token");

        let err = Roster::new(
            "c",
            "A",
            vec![student("1", "A", false), student("2", "z", false)],
        )
        .unwrap_err();
        assert_eq!(err, SelectError::InvalidRotationToken("z".to_string()));
    }

    #[test]
    fn list_eligible_does_not_flip_on_exhaustion() {
        let r = roster("A", vec![student("1", "B", false)]);
        assert!(list_eligible(&r).is_empty());
        assert_eq!(r.rotation(), Rotation::A);
    }

    #[test]
    fn picked_student_is_not_eligible_afterwards() {
        let mut rng = StdRng::seed_from_u64(7);
        let r = roster(
            "A",
            vec![
                student("1", "A", false),
                student("2", "A", false),
                student("3", "A", false),
            ],
        );
        let pick = pick_one(&r, &mut rng).expect("pick");
        assert_eq!(pick.student.rotation, Rotation::B);
        assert!(!pick.class_flipped);

        let next = commit(&r, &pick);
        assert!(!ids(&list_eligible(&next)).contains(&pick.student.id));
        assert_eq!(list_eligible(&next).len(), 2);
    }

    #[test]
    fn exhaustion_flips_class_once_and_draws_from_other_half() {
        let r = roster(
            "A",
            vec![
                student("1", "B", false),
                student("2", "B", false),
                student("3", "A", true),
            ],
        );
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let pick = pick_one(&r, &mut rng).expect("pick after flip");
            assert!(pick.class_flipped);
            assert_eq!(pick.class_rotation, Rotation::B);
            assert!(pick.student.id == "1" || pick.student.id == "2");
            assert_eq!(pick.student.rotation, Rotation::A);
        }
    }

    #[test]
    fn double_exhaustion_fails_without_mutation() {
        let mut rng = StdRng::seed_from_u64(1);

        let everyone_excluded =
            roster("A", vec![student("1", "A", true), student("2", "B", true)]);
        let err = pick_one(&everyone_excluded, &mut rng).unwrap_err();
        assert_eq!(
            err,
            SelectError::NoEligibleStudents {
                class_id: "class-1".to_string()
            }
        );
        assert_eq!(everyone_excluded.rotation(), Rotation::A);

        let empty = roster("B", vec![]);
        let err = pick_one(&empty, &mut rng).unwrap_err();
        assert_eq!(err.code(), "no_eligible_students");
        assert_eq!(empty.rotation(), Rotation::B);
    }

    #[test]
    fn excluded_student_never_picked_across_many_cycles() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut r = roster(
            "A",
            vec![
                student("1", "A", false),
                student("2", "B", false),
                student("x", "A", true),
                student("3", "A", false),
            ],
        );
        let mut flips = 0;
        for _ in 0..60 {
            assert!(!ids(&list_eligible(&r)).contains("x"));
            let pick = pick_one(&r, &mut rng).expect("pick");
            assert_ne!(pick.student.id, "x");
            if pick.class_flipped {
                flips += 1;
            }
            r = commit(&r, &pick);
        }
        assert!(flips > 5, "expected the class token to cycle, got {flips} flips");
    }

    #[test]
    fn each_student_picked_once_per_half_cycle() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut r = roster(
            "A",
            (1..=5).map(|i| student(&i.to_string(), "A", false)).collect(),
        );

        let mut seen = HashSet::new();
        for _ in 0..5 {
            let pick = pick_one(&r, &mut rng).expect("pick");
            assert!(!pick.class_flipped);
            assert!(seen.insert(pick.student.id.clone()), "repeat within a cycle");
            r = commit(&r, &pick);
        }
        assert_eq!(seen.len(), 5);

        // Half A is spent; the next pick opens half B.
        let pick = pick_one(&r, &mut rng).expect("pick");
        assert!(pick.class_flipped);
        assert_eq!(pick.class_rotation, Rotation::B);
    }

    #[test]
    fn mid_cycle_student_is_immediately_eligible() {
        let mut r = roster("B", vec![student("1", "A", false), student("2", "B", false)]);
        r.students.push(Student {
            id: "new".to_string(),
            name: "Late Joiner".to_string(),
            exclude: false,
            rotation: r.rotation(),
        });
        assert_eq!(
            ids(&list_eligible(&r)),
            HashSet::from(["2".to_string(), "new".to_string()])
        );
    }

    #[test]
    fn concrete_two_pick_scenario() {
        for seed in 0..25 {
            let mut rng = StdRng::seed_from_u64(seed);
            let r = roster(
                "A",
                vec![
                    student("1", "A", false),
                    student("2", "A", false),
                    student("3", "B", false),
                ],
            );

            let first = pick_one(&r, &mut rng).expect("first pick");
            assert!(first.student.id == "1" || first.student.id == "2");
            assert_eq!(first.student.rotation, Rotation::B);
            let r = commit(&r, &first);

            let second = pick_one(&r, &mut rng).expect("second pick");
            assert!(second.student.id == "1" || second.student.id == "2");
            assert_ne!(second.student.id, first.student.id);
            let r = commit(&r, &second);

            // Both A-students spent: class flips to B and 1, 2, 3 are all in play.
            let third = pick_one(&r, &mut rng).expect("third pick");
            assert!(third.class_flipped);
            assert_eq!(third.class_rotation, Rotation::B);
            assert!(["1", "2", "3"].contains(&third.student.id.as_str()));
        }
    }
}
