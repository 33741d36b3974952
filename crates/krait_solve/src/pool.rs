//! The pool: the in-memory union of all repository snapshots plus the
//! installed set, with interning of names and match specs and a lazily built
//! what-provides index.

use std::{collections::hash_map::Entry, str::FromStr};

use ahash::AHashMap;

use krait_conda_types::{MatchSpec, ParseMatchSpecError, RepoDataRecord};

use crate::{
    conda_sorting::compare_candidates,
    id::{MatchSpecId, NameId, RepoId, SolvableId},
    solvable::{PackageSolvable, Solvable},
};

#[derive(Debug, Copy, Clone)]
pub(crate) struct RepoInfo {
    /// Higher values are preferred when strict channel priority applies.
    pub(crate) channel_priority: i32,

    /// The repo holding the installed packages. It is exempt from strict
    /// channel priority pruning in both directions.
    pub(crate) installed: bool,
}

/// The pool of everything the solver can decide over.
///
/// The pool is built once, before the solve, and treated as immutable during
/// it; solvables reference the records they were created from (`'a`).
pub struct Pool<'a> {
    pub(crate) solvables: Vec<Solvable<'a>>,

    pub(crate) repos: Vec<RepoInfo>,

    /// Interned package names.
    package_names: Vec<String>,
    pub(crate) names_to_ids: AHashMap<String, NameId>,

    /// For each interned name, the solvables carrying it.
    pub(crate) packages_by_name: Vec<Vec<SolvableId>>,

    /// Interned match specs.
    pub(crate) match_specs: Vec<MatchSpec>,
    match_specs_to_ids: AHashMap<String, MatchSpecId>,

    /// Lazily computed candidates per match spec, sorted most preferred
    /// first.
    pub(crate) match_spec_to_candidates: Vec<Option<Vec<SolvableId>>>,

    /// Lazily computed non-matching solvables per match spec (used for
    /// `constrains` clauses).
    pub(crate) match_spec_to_forbidden: Vec<Option<Vec<SolvableId>>>,

    /// When set, candidates of a name are restricted to the highest priority
    /// channel providing that name.
    pub(crate) strict_channel_priority: bool,
}

impl<'a> Default for Pool<'a> {
    fn default() -> Self {
        Self {
            solvables: vec![Solvable::new_root()],
            repos: Vec::new(),
            package_names: Vec::new(),
            names_to_ids: AHashMap::new(),
            packages_by_name: Vec::new(),
            match_specs: Vec::new(),
            match_specs_to_ids: AHashMap::new(),
            match_spec_to_candidates: Vec::new(),
            match_spec_to_forbidden: Vec::new(),
            strict_channel_priority: false,
        }
    }
}

impl<'a> Pool<'a> {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables strict channel priority.
    pub fn set_strict_channel_priority(&mut self, strict: bool) {
        self.strict_channel_priority = strict;
    }

    /// Registers a repo with the given channel priority. Higher priorities
    /// win under strict channel priority.
    pub fn new_repo(&mut self, channel_priority: i32) -> RepoId {
        let id = RepoId::new(self.repos.len());
        self.repos.push(RepoInfo {
            channel_priority,
            installed: false,
        });
        id
    }

    /// Registers the repo holding the installed packages.
    pub fn new_installed_repo(&mut self) -> RepoId {
        let id = RepoId::new(self.repos.len());
        self.repos.push(RepoInfo {
            channel_priority: 0,
            installed: true,
        });
        id
    }

    /// Adds a package to a repo, interning its name, dependencies and
    /// constraints. Returns the new solvable's id.
    pub fn add_package(
        &mut self,
        repo_id: RepoId,
        record: &'a RepoDataRecord,
    ) -> Result<SolvableId, ParseMatchSpecError> {
        assert!(self.solvables.len() <= u32::MAX as usize);

        let name = self.intern_package_name(record.package_record.name.as_normalized());
        let solvable_id = SolvableId::new(self.solvables.len());
        self.solvables
            .push(Solvable::new_package(repo_id, name, record));
        self.packages_by_name[name.index()].push(solvable_id);

        for depends in &record.package_record.depends {
            let spec_id = self.intern_matchspec(depends)?;
            self.solvables[solvable_id.index()]
                .package_mut()
                .dependencies
                .push(spec_id);
        }
        for constrains in &record.package_record.constrains {
            let spec_id = self.intern_matchspec(constrains)?;
            self.solvables[solvable_id.index()]
                .package_mut()
                .constrains
                .push(spec_id);
        }

        Ok(solvable_id)
    }

    /// The number of solvables in the pool, including the root.
    pub fn nsolvables(&self) -> u32 {
        self.solvables.len() as u32
    }

    /// Interns a match spec, returning its id.
    pub(crate) fn intern_matchspec(
        &mut self,
        match_spec: &str,
    ) -> Result<MatchSpecId, ParseMatchSpecError> {
        let next_index = self.match_specs.len();
        match self.match_specs_to_ids.entry(match_spec.to_owned()) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => {
                self.match_specs.push(MatchSpec::from_str(entry.key())?);
                self.match_spec_to_candidates.push(None);
                self.match_spec_to_forbidden.push(None);
                let id = MatchSpecId::new(next_index);
                entry.insert(id);
                Ok(id)
            }
        }
    }

    /// Returns the match spec for an id.
    pub fn resolve_match_spec(&self, id: MatchSpecId) -> &MatchSpec {
        &self.match_specs[id.index()]
    }

    fn intern_package_name(&mut self, name: &str) -> NameId {
        match self.names_to_ids.entry(name.to_owned()) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let id = NameId::new(self.package_names.len());
                self.package_names.push(entry.key().clone());
                self.packages_by_name.push(Vec::new());
                entry.insert(id);
                id
            }
        }
    }

    /// Returns the interned name for an id.
    pub fn resolve_package_name(&self, name_id: NameId) -> &str {
        &self.package_names[name_id.index()]
    }

    /// Returns every solvable matching the spec, most preferred first. This
    /// is the "what provides" query; channel pinning and strict channel
    /// priority are respected.
    pub fn select_solvables(
        &mut self,
        spec: &MatchSpec,
    ) -> Result<Vec<SolvableId>, ParseMatchSpecError> {
        let spec_id = self.intern_matchspec(&spec.to_string())?;
        Ok(Pool::get_candidates(
            &self.match_specs,
            &self.names_to_ids,
            &self.solvables,
            &self.packages_by_name,
            &self.repos,
            self.strict_channel_priority,
            &mut self.match_spec_to_candidates,
            &AHashMap::new(),
            spec_id,
        )
        .to_vec())
    }

    /// Returns the package solvable for an id. Panics for the root.
    pub fn resolve_solvable(&self, id: SolvableId) -> &PackageSolvable<'a> {
        self.solvables[id.index()].package()
    }

    pub(crate) fn resolve_solvable_inner(&self, id: SolvableId) -> &Solvable<'a> {
        &self.solvables[id.index()]
    }

    pub(crate) fn root_solvable_mut(&mut self) -> &mut Vec<MatchSpecId> {
        self.solvables[0].root_mut()
    }

    /// Returns every solvable matching the spec, most preferred first. The
    /// result is computed once per spec and cached.
    ///
    /// This is a free function over the pool's fields so the solver can call
    /// it while holding references into other parts of the pool.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn get_candidates<'b>(
        match_specs: &[MatchSpec],
        names_to_ids: &AHashMap<String, NameId>,
        solvables: &[Solvable<'_>],
        packages_by_name: &[Vec<SolvableId>],
        repos: &[RepoInfo],
        strict_channel_priority: bool,
        match_spec_to_candidates: &'b mut [Option<Vec<SolvableId>>],
        favored_map: &AHashMap<NameId, SolvableId>,
        match_spec_id: MatchSpecId,
    ) -> &'b [SolvableId] {
        match_spec_to_candidates[match_spec_id.index()].get_or_insert_with(|| {
            let match_spec = &match_specs[match_spec_id.index()];
            let Some(match_spec_name) = match_spec.name.as_ref() else {
                return Vec::new();
            };
            let Some(name_id) = names_to_ids.get(match_spec_name.as_normalized()) else {
                return Vec::new();
            };

            let mut candidates: Vec<SolvableId> = packages_by_name[name_id.index()]
                .iter()
                .copied()
                .filter(|&solvable| {
                    match_spec.matches_record(solvables[solvable.index()].package().record)
                })
                .collect();

            // Under strict channel priority only the highest ranked channel
            // that provides the name at all may contribute candidates. The
            // installed repo neither competes nor gets pruned.
            if strict_channel_priority {
                let best_priority = packages_by_name[name_id.index()]
                    .iter()
                    .map(|&solvable| {
                        &repos[solvables[solvable.index()].package().repo_id.index()]
                    })
                    .filter(|repo| !repo.installed)
                    .map(|repo| repo.channel_priority)
                    .max();
                if let Some(best_priority) = best_priority {
                    candidates.retain(|&solvable| {
                        let repo =
                            &repos[solvables[solvable.index()].package().repo_id.index()];
                        repo.installed || repo.channel_priority == best_priority
                    });
                }
            }

            candidates.sort_by(|&a, &b| {
                let a = solvables[a.index()].package();
                let b = solvables[b.index()].package();
                compare_candidates(
                    a.record,
                    repos[a.repo_id.index()].channel_priority,
                    b.record,
                    repos[b.repo_id.index()].channel_priority,
                )
            });

            // An installed (favored) candidate moves to the front so the
            // solver prefers keeping what is already there.
            if let Some(&favored) = favored_map.get(name_id) {
                if let Some(position) = candidates.iter().position(|&s| s == favored) {
                    let favored = candidates.remove(position);
                    candidates.insert(0, favored);
                }
            }

            candidates
        })
    }

    /// Returns every solvable of the spec's name that does *not* match the
    /// spec. Used to encode `constrains`.
    pub(crate) fn get_forbidden<'b>(
        match_specs: &[MatchSpec],
        names_to_ids: &AHashMap<String, NameId>,
        solvables: &[Solvable<'_>],
        packages_by_name: &[Vec<SolvableId>],
        match_spec_to_forbidden: &'b mut [Option<Vec<SolvableId>>],
        match_spec_id: MatchSpecId,
    ) -> &'b [SolvableId] {
        match_spec_to_forbidden[match_spec_id.index()].get_or_insert_with(|| {
            let match_spec = &match_specs[match_spec_id.index()];
            let Some(match_spec_name) = match_spec.name.as_ref() else {
                return Vec::new();
            };
            let Some(name_id) = names_to_ids.get(match_spec_name.as_normalized()) else {
                return Vec::new();
            };

            packages_by_name[name_id.index()]
                .iter()
                .copied()
                .filter(|&solvable| {
                    !match_spec.matches_record(solvables[solvable.index()].package().record)
                })
                .collect()
        })
    }

}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use ahash::AHashMap;
    use krait_conda_types::{PackageName, PackageRecord, RepoDataRecord, Version};

    use super::Pool;

    fn record(name: &str, version: &str) -> RepoDataRecord {
        RepoDataRecord {
            package_record: PackageRecord::new(
                PackageName::new_unchecked(name),
                Version::from_str(version).unwrap(),
                "0".to_owned(),
            ),
            file_name: format!("{name}-{version}-0.tar.bz2"),
            url: url::Url::parse("https://example.com/pkg.tar.bz2").unwrap(),
            channel: None,
        }
    }

    #[test]
    fn candidates_are_sorted_and_filtered() {
        let records = vec![
            record("pkga", "1.0"),
            record("pkga", "2.0"),
            record("pkga", "1.5"),
            record("other", "9.9"),
        ];

        let mut pool = Pool::new();
        let repo = pool.new_repo(0);
        for r in &records {
            pool.add_package(repo, r).unwrap();
        }

        let spec = pool.intern_matchspec("pkga <2").unwrap();
        let candidates = Pool::get_candidates(
            &pool.match_specs,
            &pool.names_to_ids,
            &pool.solvables,
            &pool.packages_by_name,
            &pool.repos,
            pool.strict_channel_priority,
            &mut pool.match_spec_to_candidates,
            &AHashMap::new(),
            spec,
        )
        .to_vec();

        let versions: Vec<String> = candidates
            .iter()
            .map(|&id| {
                pool.solvables[id.index()]
                    .package()
                    .record
                    .package_record
                    .version
                    .to_string()
            })
            .collect();
        assert_eq!(versions, vec!["1.5", "1.0"]);
    }

    #[test]
    fn select_solvables_answers_what_provides() {
        let records = vec![
            record("pkga", "1.0"),
            record("pkga", "2.0"),
            record("other", "9.9"),
        ];
        let mut pool = Pool::new();
        let repo = pool.new_repo(0);
        for r in &records {
            pool.add_package(repo, r).unwrap();
        }

        let spec: krait_conda_types::MatchSpec = "pkga".parse().unwrap();
        let provides = pool.select_solvables(&spec).unwrap();
        assert_eq!(provides.len(), 2);
        // Most preferred (highest version) first.
        assert_eq!(
            pool.resolve_solvable(provides[0])
                .record()
                .package_record
                .version
                .to_string(),
            "2.0"
        );

        let none: krait_conda_types::MatchSpec = "absent".parse().unwrap();
        assert!(pool.select_solvables(&none).unwrap().is_empty());
    }

    #[test]
    fn strict_channel_priority_prunes_lower_channels() {
        let high = record("pkga", "1.0");
        let low = record("pkga", "9.9");

        let mut pool = Pool::new();
        pool.set_strict_channel_priority(true);
        let high_repo = pool.new_repo(1);
        let low_repo = pool.new_repo(0);
        pool.add_package(high_repo, &high).unwrap();
        pool.add_package(low_repo, &low).unwrap();

        let spec = pool.intern_matchspec("pkga").unwrap();
        let candidates = Pool::get_candidates(
            &pool.match_specs,
            &pool.names_to_ids,
            &pool.solvables,
            &pool.packages_by_name,
            &pool.repos,
            pool.strict_channel_priority,
            &mut pool.match_spec_to_candidates,
            &AHashMap::new(),
            spec,
        )
        .to_vec();

        // The newer version in the lower priority channel is pruned.
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            pool.solvables[candidates[0].index()]
                .package()
                .record
                .package_record
                .version
                .to_string(),
            "1.0"
        );
    }
}
